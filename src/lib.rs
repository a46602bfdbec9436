//! # Arena Tournament
//!
//! A Rust crate for running round-robin tournaments of 1v1 AI agents against an external,
//! authoritative game engine.
//!
//! It provides:
//! - An agent client speaking the engine's line-delimited JSON protocol ([`session`])
//! - A cumulative per-match decision budget enforced around every strategy call ([`decider`])
//! - One engine process per match, optionally contained with Linux cgroups v2 ([`engine`])
//! - Directed round-robin pools and their standings ([`pool`])
//! - A fixed set of workers playing matches in parallel, each on its own port ([`Evaluator`])
//!
//! A strategy is a plain function of `(snapshot, scratch data) -> Command`. Its scratch data is
//! built fresh for every match, threaded through every call of that match, and handed back to
//! the [`TeamRegistry`](team_registry::TeamRegistry) when the match is over. Whatever a strategy
//! does (returning an error, panicking, taking too long) only ever results in an `INVALID`
//! command being sent to the engine.
//!
//! # Documentation Overview
//!
//! - Match timing and engine limits: [`constraints`]
//! - Runtime behavior (workers, ports, logging): [`Configuration`](configuration::Configuration)
//! - Data sent by the engine and commands sent back: [`game_interface`]
//! - Tournament execution: [`evaluator`]
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use arena_tournament::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let constraints = ConstraintsBuilder::from_env().build()?;
//!     let config = Configuration::from_env();
//!
//!     // walk towards the closest opponent, shoot when close enough
//!     let hunter = TeamEntry::new(
//!         |snapshot: &GameSnapshot, turns: &mut u32| {
//!             *turns += 1;
//!             let me = snapshot.controlled_player.position;
//!             match snapshot.other_players.first() {
//!                 Some(other) if (other.position.x - me.x).abs() < 5.0 => Command::shoot(0.0),
//!                 Some(other) => Command::move_towards(Vec3::new(
//!                     other.position.x - me.x,
//!                     0.0,
//!                     other.position.z - me.z,
//!                 )),
//!                 None => Command::shoot(90.0),
//!             }
//!         },
//!         || 0u32,
//!     );
//!     let camper = TeamEntry::new(|_: &GameSnapshot, _: &mut ()| Command::shoot(180.0), || ());
//!     let registry = StaticRegistry::new()
//!         .with_team("hunter", hunter)
//!         .with_team("camper", camper);
//!
//!     let engine = JarEngine::new("java", "engine.jar", &constraints, &config);
//!     let pools = load_pools("pool_data.json", &constraints, config.save_dir())?;
//!
//!     let evaluator = Evaluator::new(Arc::new(engine), Arc::new(registry), config);
//!     for pool in evaluator.evaluate(pools)? {
//!         println!("pool {}: {:?}", pool.number, pool.standings());
//!     }
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;

pub mod agent;
mod cgroup_manager;
pub mod configuration;
pub mod constraints;
mod decider;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod game_interface;
mod logger;
pub mod match_runner;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod team_registry;
mod tournament_scheduler;

pub use decider::DecisionBudget;
pub use evaluator::Evaluator;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use arena_tournament::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::constraints::ConstraintsBuilder;
    pub use crate::engine::{Engine, EngineParameters, EngineProcess, JarEngine};
    pub use crate::evaluator::Evaluator;
    pub use crate::game_interface::{AgentProgram, Command, GameSnapshot, Scratch, Vec3};
    pub use crate::pool::{load_pools, MatchResult, Pool};
    pub use crate::team_registry::{StaticRegistry, TeamEntry, TeamRegistry};
}
