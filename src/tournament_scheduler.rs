//! Spreads scheduled matches over a fixed set of workers.
//!
//! The match list is cut into contiguous shards, one per worker, the last shard taking the
//! remainder. Each worker owns one port (`base_port + index`) and plays its shard one match at a
//! time, sending every result on its own channel and closing it when done. The caller drains
//! workers in order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context};
use tracing::{error, info, instrument, warn};

use crate::agent::{AgentIdentity, Team};
use crate::configuration::Configuration;
use crate::decider::panic_message;
use crate::engine::Engine;
use crate::match_runner::{spawn_match, Contender, MatchOutcome};
use crate::pool::{MatchResult, ScheduledMatch};
use crate::team_registry::TeamRegistry;

/// Runs matches on `config.workers` worker threads.
pub struct TournamentScheduler {
    engine: Arc<dyn Engine>,
    registry: Arc<dyn TeamRegistry>,
    config: Configuration,
}

impl TournamentScheduler {
    /// Workers will share `engine` and `registry`.
    pub fn new(
        engine: Arc<dyn Engine>,
        registry: Arc<dyn TeamRegistry>,
        config: Configuration,
    ) -> Self {
        Self {
            engine,
            registry,
            config,
        }
    }

    /// Plays every match and returns one result per match, grouped by shard in match order.
    ///
    /// # Errors
    /// Only when workers cannot be started: ports overflowing `u16`, or thread creation failure.
    /// Failures of individual matches are reported as aborted results.
    #[instrument(skip_all, fields(matches = matches.len()))]
    pub fn run(&self, matches: Vec<ScheduledMatch>) -> anyhow::Result<Vec<MatchResult>> {
        let total = matches.len();
        let shards = partition(matches, self.config.workers);
        info!(workers = shards.len(), "starting workers");

        let mut workers = Vec::with_capacity(shards.len());
        for (index, shard) in shards.into_iter().enumerate() {
            let port = u16::try_from(index)
                .ok()
                .and_then(|i| self.config.base_port.checked_add(i))
                .ok_or_else(|| anyhow!("no port left for worker {index}"))?;
            let worker = Worker {
                index,
                port,
                engine: Arc::clone(&self.engine),
                registry: Arc::clone(&self.registry),
                config: self.config.clone(),
            };
            let expected = shard.clone();
            let (tx, rx) = mpsc::channel();
            let handle: JoinHandle<()> = thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || worker.run(shard, tx))
                .with_context(|| format!("could not spawn worker {index}"))?;
            workers.push((expected, rx, handle));
        }

        let mut results = Vec::with_capacity(total);
        for (index, (expected, rx, handle)) in workers.into_iter().enumerate() {
            // the channel closes when the worker is done with its shard
            let received = rx.iter().collect::<Vec<_>>();
            if let Err(payload) = handle.join() {
                error!(
                    worker = index,
                    "worker panicked: {}",
                    panic_message(&*payload)
                );
            }
            let played = received.len();
            results.extend(received);
            if played < expected.len() {
                warn!(
                    worker = index,
                    missing = expected.len() - played,
                    "worker stopped before the end of its shard"
                );
                results.extend(expected.into_iter().skip(played).map(|m| {
                    MatchResult::aborted(m, "worker stopped before playing this match")
                }));
            }
        }
        Ok(results)
    }
}

struct Worker {
    index: usize,
    port: u16,
    engine: Arc<dyn Engine>,
    registry: Arc<dyn TeamRegistry>,
    config: Configuration,
}

impl Worker {
    #[instrument(skip_all, fields(worker = self.index, port = self.port))]
    fn run(self, shard: Vec<ScheduledMatch>, results: Sender<MatchResult>) {
        info!(matches = shard.len(), "worker started");
        for scheduled in shard {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.play(&scheduled)));
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("{scheduled} failed: {e:#}");
                    MatchResult::aborted(scheduled, format!("{e:#}"))
                }
                Err(payload) => {
                    let message = format!("match panicked: {}", panic_message(&*payload));
                    error!("{scheduled}: {message}");
                    MatchResult::aborted(scheduled, message)
                }
            };

            if self.config.verbose {
                print_match_result(&result);
            }
            if results.send(result).is_err() {
                warn!("result receiver is gone, stopping");
                break;
            }
        }
        info!("worker done");
    }

    fn play(&self, scheduled: &ScheduledMatch) -> anyhow::Result<MatchResult> {
        let program_1 = self
            .registry
            .resolve(&scheduled.team_1)
            .with_context(|| format!("could not resolve team '{}'", scheduled.team_1))?;
        let program_2 = self
            .registry
            .resolve(&scheduled.team_2)
            .with_context(|| format!("could not resolve team '{}'", scheduled.team_2))?;

        let contenders = [
            Contender::new(
                AgentIdentity::new(scheduled.team_1.clone(), Team::Blue),
                program_1,
            ),
            Contender::new(
                AgentIdentity::new(scheduled.team_2.clone(), Team::Red),
                program_2,
            ),
        ];
        let MatchOutcome {
            results, scratch, ..
        } = spawn_match(
            Arc::clone(&self.engine),
            &self.config,
            scheduled.engine_parameters(),
            self.port,
            contenders,
        )?
        .wait()?;

        for (result, scratch) in results.iter().zip(scratch) {
            if let Some(scratch) = scratch {
                self.registry.store_scratch(&result.username, scratch);
            }
        }

        Ok(MatchResult::played(scheduled.clone(), &results))
    }
}

/// Cuts `items` into at most `shards` contiguous, non-empty slices of `len / shards` items, the
/// last one taking the remainder.
pub(crate) fn partition<T>(items: Vec<T>, shards: usize) -> Vec<Vec<T>> {
    let shards = shards.min(items.len());
    if shards == 0 {
        return vec![];
    }
    let size = items.len() / shards;
    let mut items = items.into_iter();
    let mut out = Vec::with_capacity(shards);
    for _ in 0..shards - 1 {
        out.push(items.by_ref().take(size).collect());
    }
    out.push(items.collect());
    out
}

fn print_match_result(result: &MatchResult) {
    let errors = result.message.as_deref().unwrap_or_default();
    let winner = match &result.winner {
        Some(winner) => format!("winner: {winner}"),
        None if result.aborted => "aborted".to_owned(),
        None => "draw".to_owned(),
    };
    // clear line, green match, scores, red errors
    println!(
        "\x1b[2K\x1b[32m{}: \x1b[39m{}-{} ({winner}) \x1b[31m{errors}\x1b[39m",
        result.scheduled, result.score_1, result.score_2
    );
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::bail;

    use super::*;
    use crate::constraints::ConstraintsBuilder;
    use crate::engine::{EngineParameters, EngineProcess};
    use crate::game_interface::{AgentProgram, Command, GameSnapshot};
    use crate::pool::Pool;
    use crate::team_registry::{StaticRegistry, TeamEntry};

    /// Never starts, records the ports it was asked for.
    #[derive(Default)]
    struct NoEngine {
        ports: Mutex<Vec<u16>>,
    }

    impl Engine for NoEngine {
        fn launch(
            &self,
            _parameters: &EngineParameters,
            port: u16,
        ) -> anyhow::Result<Box<dyn EngineProcess>> {
            self.ports.lock().unwrap().push(port);
            bail!("engine unavailable")
        }
    }

    struct PanickingRegistry;

    impl TeamRegistry for PanickingRegistry {
        fn resolve(&self, team: &str) -> anyhow::Result<AgentProgram> {
            panic!("registry bug on {team}")
        }
    }

    fn matches(teams: &[&str]) -> Vec<ScheduledMatch> {
        let constraints = ConstraintsBuilder::new().build().unwrap();
        let players = teams.iter().map(|t| t.to_string()).collect();
        Pool::round_robin(1, players, &constraints, Path::new("saves"))
            .unwrap()
            .matches
    }

    fn registry(teams: &[&str]) -> StaticRegistry {
        let mut registry = StaticRegistry::new();
        for team in teams {
            registry.register(
                *team,
                TeamEntry::new(|_: &GameSnapshot, _: &mut ()| Command::shoot(0.0), || ()),
            );
        }
        registry
    }

    fn config(workers: usize) -> Configuration {
        Configuration::new()
            .with_verbose(false)
            .with_workers(workers)
            .with_base_port(4000)
            .with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn test_partition() {
        let shards = partition((0..6).collect(), 2);
        assert_eq!(shards, vec![vec![0, 1, 2], vec![3, 4, 5]]);

        let shards = partition((0..7).collect(), 3);
        assert_eq!(shards, vec![vec![0, 1], vec![2, 3], vec![4, 5, 6]]);

        let shards = partition((0..2).collect(), 8);
        assert_eq!(shards, vec![vec![0], vec![1]]);

        assert!(partition(Vec::<u8>::new(), 4).is_empty());
    }

    #[test]
    fn test_every_match_yields_a_result() {
        let engine = Arc::new(NoEngine::default());
        let scheduler = TournamentScheduler::new(
            engine.clone(),
            Arc::new(registry(&["a", "b", "c"])),
            config(2),
        );
        let scheduled = matches(&["a", "b", "c"]);
        assert_eq!(scheduled.len(), 6);

        let results = scheduler.run(scheduled.clone()).unwrap();
        assert_eq!(results.len(), 6);
        for (result, scheduled) in results.iter().zip(&scheduled) {
            assert_eq!(&result.scheduled, scheduled);
            assert!(result.aborted);
            assert_eq!(result.winner, None);
            assert!(result.message.as_deref().unwrap().contains("engine unavailable"));
        }

        let mut ports = engine.ports.lock().unwrap().clone();
        ports.sort_unstable();
        assert_eq!(ports, vec![4000, 4000, 4000, 4001, 4001, 4001]);
    }

    #[test]
    fn test_unknown_team_only_affects_its_matches() {
        let engine = Arc::new(NoEngine::default());
        let scheduler =
            TournamentScheduler::new(engine.clone(), Arc::new(registry(&["a", "b"])), config(1));

        let results = scheduler.run(matches(&["a", "b", "ghost"])).unwrap();
        assert_eq!(results.len(), 6);
        let unresolved = results
            .iter()
            .filter(|r| r.message.as_deref().unwrap().contains("ghost"))
            .count();
        assert_eq!(unresolved, 4);
        // only a-b and b-a reached the engine
        assert_eq!(engine.ports.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_panics_are_contained() {
        let scheduler = TournamentScheduler::new(
            Arc::new(NoEngine::default()),
            Arc::new(PanickingRegistry),
            config(3),
        );
        let results = scheduler.run(matches(&["a", "b", "c"])).unwrap();
        assert_eq!(results.len(), 6);
        assert!(results
            .iter()
            .all(|r| r.aborted && r.message.as_deref().unwrap().contains("registry bug")));
    }
}
