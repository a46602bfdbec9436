//! Module defining what the engine gives to agents, and what agents give back
//!
//! A strategy is a plain function value over `(GameSnapshot, scratch)`. The scratch data is an
//! opaque value owned by one session for the whole match, and handed back to the caller once the
//! match is over.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::protocol::lenient_f32;

/// A 3D vector as sent by the engine (`{"x":..,"y":..,"z":..}`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// Horizontal axis
    #[serde(deserialize_with = "lenient_f32")]
    pub x: f32,
    /// Vertical axis
    #[serde(deserialize_with = "lenient_f32")]
    pub y: f32,
    /// Depth axis
    #[serde(deserialize_with = "lenient_f32")]
    pub z: f32,
}

impl Vec3 {
    /// Creates a new vector
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Returns `[x, y, z]`
    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Animation state of a player, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    /// Standing still
    Idle,
    /// Walking
    Moving,
    /// Firing a projectile
    Shooting,
    /// Just took a hit
    Hit,
    /// Out of the match
    Dead,
}

/// One player, rebuilt from every decision request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// World position
    #[serde(rename = "pos")]
    pub position: Vec3,
    /// Current velocity
    #[serde(rename = "speed")]
    pub velocity: Vec3,
    /// Remaining health
    #[serde(deserialize_with = "lenient_f32")]
    pub health: f32,
    /// Team id (0 or 1 in a regular match)
    pub team: i32,
    /// Score in seconds
    #[serde(deserialize_with = "lenient_f32")]
    pub score: f32,
    /// Not sent by every engine version
    #[serde(default)]
    pub state: Option<PlayerState>,
}

/// One projectile in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    /// World position
    #[serde(rename = "pos")]
    pub position: Vec3,
    /// Current velocity
    #[serde(rename = "speed")]
    pub velocity: Vec3,
}

/// Everything a strategy gets to see for one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// The player driven by this agent
    #[serde(rename = "controlledPlayer")]
    pub controlled_player: PlayerSnapshot,
    /// Every other player, in engine order
    #[serde(rename = "otherPlayers")]
    pub other_players: Vec<PlayerSnapshot>,
    /// Every projectile, in engine order
    pub projectiles: Vec<ProjectileSnapshot>,
}

/// What a strategy answers to a decision request.
///
/// `Invalid` tells the engine the agent forfeits. It is produced by the session when the
/// strategy fails or runs out of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command_type")]
pub enum Command {
    /// Move along `direction`
    #[serde(rename = "MOVE")]
    Move {
        /// Not necessarily normalized
        #[serde(rename = "move_direction")]
        direction: [f32; 3],
    },
    /// Shoot at `angle` degrees, counterclockwise, in `[0, 360)`
    #[serde(rename = "SHOOT")]
    Shoot {
        /// In degrees
        #[serde(rename = "shoot_angle")]
        angle: f32,
    },
    /// Forfeit
    #[serde(rename = "INVALID")]
    Invalid {
        /// Shown in the engine logs
        #[serde(rename = "whatever_value")]
        reason: String,
    },
}

impl Command {
    /// Shortcut for [`Command::Move`]
    pub fn move_towards(direction: Vec3) -> Self {
        Command::Move {
            direction: direction.to_array(),
        }
    }

    /// Shortcut for [`Command::Shoot`]
    pub fn shoot(angle: f32) -> Self {
        Command::Shoot { angle }
    }

    /// Shortcut for [`Command::Invalid`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Command::Invalid {
            reason: reason.into(),
        }
    }

    /// Checks that the command can be sent to the engine.
    ///
    /// Shoot angles are wrapped into `[0, 360)`.
    ///
    /// # Errors
    /// Returned when a direction component or the angle is not finite.
    pub fn validate(self) -> anyhow::Result<Command> {
        match self {
            Command::Move { direction } => {
                if direction.iter().all(|c| c.is_finite()) {
                    Ok(Command::Move { direction })
                } else {
                    Err(anyhow!("move direction is not finite: {direction:?}"))
                }
            }
            Command::Shoot { angle } => {
                if angle.is_finite() {
                    let angle = angle.rem_euclid(360.0);
                    // rem_euclid can round up to exactly 360 for tiny negative angles
                    let angle = if angle >= 360.0 { 0.0 } else { angle };
                    Ok(Command::Shoot { angle })
                } else {
                    Err(anyhow!("shoot angle is not finite: {angle}"))
                }
            }
            invalid @ Command::Invalid { .. } => Ok(invalid),
        }
    }

    /// True for [`Command::Invalid`]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Command::Invalid { .. })
    }
}

/// Opaque per-match data owned by a strategy.
pub type Scratch = Box<dyn Any + Send>;

/// A strategy: given the snapshot and its scratch data, decide what to do.
///
/// Returning `Err` is equivalent to the strategy raising: the session sends
/// [`Command::Invalid`] and keeps going.
pub type StrategyFn =
    Arc<dyn Fn(&GameSnapshot, &mut Scratch) -> anyhow::Result<Command> + Send + Sync>;

/// A strategy together with the scratch data it will use for one match.
pub struct AgentProgram {
    /// The decision function
    pub strategy: StrategyFn,
    /// Its data, moved into the session for the duration of the match
    pub scratch: Scratch,
}

impl AgentProgram {
    /// Wraps an infallible, typed strategy.
    ///
    /// The scratch data is stored type-erased and downcast back to `D` on every call.
    pub fn new<D, F>(strategy: F, scratch: D) -> Self
    where
        D: Any + Send,
        F: Fn(&GameSnapshot, &mut D) -> Command + Send + Sync + 'static,
    {
        Self::fallible(move |snapshot, data: &mut D| Ok(strategy(snapshot, data)), scratch)
    }

    /// Wraps a typed strategy that may fail.
    pub fn fallible<D, F>(strategy: F, scratch: D) -> Self
    where
        D: Any + Send,
        F: Fn(&GameSnapshot, &mut D) -> anyhow::Result<Command> + Send + Sync + 'static,
    {
        Self {
            strategy: erase(strategy),
            scratch: Box::new(scratch),
        }
    }
}

impl fmt::Debug for AgentProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentProgram").finish_non_exhaustive()
    }
}

/// Turns a typed strategy into a [`StrategyFn`].
pub(crate) fn erase<D, F>(strategy: F) -> StrategyFn
where
    D: Any + Send,
    F: Fn(&GameSnapshot, &mut D) -> anyhow::Result<Command> + Send + Sync + 'static,
{
    Arc::new(move |snapshot: &GameSnapshot, scratch: &mut Scratch| {
        let data = scratch
            .downcast_mut::<D>()
            .ok_or_else(|| anyhow!("scratch data has an unexpected type"))?;
        strategy(snapshot, data)
    })
}
