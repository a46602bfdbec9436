//! Where team names are turned into something that can play.
//!
//! A team is a strategy function together with a constructor of its scratch data. Every match
//! gets fresh scratch data built by that constructor.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

use crate::game_interface::{erase, AgentProgram, Command, GameSnapshot, Scratch, StrategyFn};

/// Resolves team names into programs, once per match.
pub trait TeamRegistry: Send + Sync {
    /// Builds the program of `team` for one match.
    ///
    /// # Errors
    /// Unknown team, or a team whose scratch data could not be built. Only the match being
    /// prepared is affected.
    fn resolve(&self, team: &str) -> anyhow::Result<AgentProgram>;

    /// Receives the final scratch data of `team` after each match it played.
    fn store_scratch(&self, _team: &str, _scratch: Scratch) {}
}

type ScratchInit = Arc<dyn Fn() -> Scratch + Send + Sync>;

/// A strategy and the constructor of its scratch data.
#[derive(Clone)]
pub struct TeamEntry {
    strategy: StrategyFn,
    init: ScratchInit,
}

impl TeamEntry {
    /// A team whose strategy cannot fail.
    pub fn new<D, F, I>(strategy: F, init: I) -> Self
    where
        D: Any + Send,
        F: Fn(&GameSnapshot, &mut D) -> Command + Send + Sync + 'static,
        I: Fn() -> D + Send + Sync + 'static,
    {
        Self::fallible(
            move |snapshot: &GameSnapshot, data: &mut D| Ok(strategy(snapshot, data)),
            init,
        )
    }

    /// A team whose strategy may return an error, sent to the engine as an invalid command.
    pub fn fallible<D, F, I>(strategy: F, init: I) -> Self
    where
        D: Any + Send,
        F: Fn(&GameSnapshot, &mut D) -> anyhow::Result<Command> + Send + Sync + 'static,
        I: Fn() -> D + Send + Sync + 'static,
    {
        Self {
            strategy: erase(strategy),
            init: Arc::new(move || Box::new(init()) as Scratch),
        }
    }

    /// Fresh program for one match.
    pub fn program(&self) -> AgentProgram {
        AgentProgram {
            strategy: Arc::clone(&self.strategy),
            scratch: (self.init)(),
        }
    }
}

impl fmt::Debug for TeamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamEntry").finish_non_exhaustive()
    }
}

/// Teams known in advance, by name.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    teams: HashMap<String, TeamEntry>,
}

impl StaticRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a team.
    pub fn register(&mut self, name: impl Into<String>, entry: TeamEntry) {
        self.teams.insert(name.into(), entry);
    }

    /// Builder flavour of [`register`](Self::register).
    pub fn with_team(mut self, name: impl Into<String>, entry: TeamEntry) -> Self {
        self.register(name, entry);
        self
    }
}

impl TeamRegistry for StaticRegistry {
    fn resolve(&self, team: &str) -> anyhow::Result<AgentProgram> {
        self.teams
            .get(team)
            .map(TeamEntry::program)
            .ok_or_else(|| anyhow!("unknown team '{team}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_interface::interface_tests::snapshot;

    #[test]
    fn test_fresh_scratch_per_resolution() {
        let registry = StaticRegistry::new().with_team(
            "counter",
            TeamEntry::new(
                |_: &GameSnapshot, calls: &mut u32| {
                    *calls += 1;
                    Command::shoot(*calls as f32)
                },
                || 10u32,
            ),
        );

        let mut first = registry.resolve("counter").unwrap();
        (first.strategy)(&snapshot(), &mut first.scratch).unwrap();
        (first.strategy)(&snapshot(), &mut first.scratch).unwrap();
        assert_eq!(*first.scratch.downcast_ref::<u32>().unwrap(), 12);

        let second = registry.resolve("counter").unwrap();
        assert_eq!(*second.scratch.downcast_ref::<u32>().unwrap(), 10);
    }

    #[test]
    fn test_unknown_team() {
        let registry = StaticRegistry::new();
        let error = registry.resolve("ghost").unwrap_err();
        assert!(error.to_string().contains("ghost"));
    }
}
