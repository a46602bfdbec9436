//! Top level of a tournament run.
//!
//! This module defines the [`Evaluator`] type, which ties together:
//!
//! - an [`Engine`] able to start one game engine per match
//! - a [`TeamRegistry`] turning team names into strategies
//! - the runtime [`Configuration`] (workers, ports, verbosity, logging)
//!
//! [`Evaluator::evaluate`] plays every match of the given pools and hands the pools back with
//! their results filled in. Standings are then read with [`Pool::standings`].
//!
//! # Behavior & Configuration
//!
//! - Matches are spread over `config.workers` workers, worker `i` hosting its engines on port
//!   `config.base_port + i`.
//! - Nothing a single match does (unknown team, engine that cannot start, panicking strategy)
//!   stops the tournament: the match is recorded as aborted and the worker moves on.
//! - When `config.verbose` is set, a line is printed for every finished match and a standings
//!   table for every pool at the end.
//! - When `config.log` is set, a file logger is installed (see the `logger` module).
//!
//! # Example
//!
//! See crate-level documentation.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::bail;
use tracing::{info, instrument, trace, warn};

use crate::configuration::Configuration;
use crate::engine::Engine;
use crate::logger::init_logger;
use crate::pool::Pool;
use crate::team_registry::TeamRegistry;
use crate::tournament_scheduler::TournamentScheduler;

/// Runs the pools of a tournament.
pub struct Evaluator {
    engine: Arc<dyn Engine>,
    registry: Arc<dyn TeamRegistry>,
    config: Configuration,
}

impl Evaluator {
    /// Create an [`Evaluator`]. Installs the file logger if `config.log` is set.
    #[instrument(skip_all)]
    pub fn new(
        engine: Arc<dyn Engine>,
        registry: Arc<dyn TeamRegistry>,
        config: Configuration,
    ) -> Evaluator {
        if config.log {
            if let Err(e) = init_logger() {
                eprintln!("logging disabled: {e:#}");
            }
        }
        trace!(?config);

        Evaluator {
            engine,
            registry,
            config,
        }
    }

    /// Plays every match of `pools`.
    ///
    /// # Returns
    /// The same pools, each holding exactly one [`MatchResult`](crate::pool::MatchResult) per
    /// scheduled match.
    ///
    /// # Errors
    /// Returns an error if two pools share a number, or if workers cannot be started.
    pub fn evaluate(&self, mut pools: Vec<Pool>) -> anyhow::Result<Vec<Pool>> {
        let mut numbers = BTreeSet::new();
        for pool in &pools {
            if !numbers.insert(pool.number) {
                bail!("pool {} appears twice", pool.number);
            }
        }

        let matches = pools
            .iter()
            .flat_map(|pool| pool.matches.iter().cloned())
            .collect::<Vec<_>>();
        info!(
            pools = pools.len(),
            matches = matches.len(),
            "starting tournament"
        );

        if self.config.verbose {
            disable_line_wrap();
        }
        let scheduler = TournamentScheduler::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.registry),
            self.config.clone(),
        );
        let results = scheduler.run(matches);
        if self.config.verbose {
            enable_line_wrap();
        }

        for result in results? {
            match pools.iter_mut().find(|p| p.number == result.scheduled.pool) {
                Some(pool) => pool.results.push(result),
                None => warn!("result for unknown pool {}", result.scheduled.pool),
            }
        }

        for pool in &pools {
            info!(pool = pool.number, standings = ?pool.standings());
            if self.config.verbose {
                print_standings(pool);
            }
        }
        Ok(pools)
    }
}

fn print_standings(pool: &Pool) {
    let aborted = pool.results.iter().filter(|r| r.aborted).count();
    println!(
        "\x1b[1mPool {}\x1b[0m ({} matches, {aborted} aborted)",
        pool.number,
        pool.results.len()
    );
    let width = pool.players.iter().map(String::len).max().unwrap_or(0) + 3;
    for (rank, (team, wins)) in pool.ranking().into_iter().enumerate() {
        println!("{:>3}. {team:.<width$} {wins}", rank + 1);
    }
}

fn disable_line_wrap() {
    print!("\x1b[?7l");
}

fn enable_line_wrap() {
    print!("\x1b[?7h");
}
