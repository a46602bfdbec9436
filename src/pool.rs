//! Pools of teams playing a directed round-robin, and their standings.
//!
//! Every ordered pair `(A, B)` with `A != B` is scheduled once: the engine outcome may depend on
//! the starting side, so `(A, B)` and `(B, A)` are different matches. A pool of `n` teams has
//! `n * (n - 1)` matches.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::info;

use crate::agent::AgentResult;
use crate::constraints::Constraints;
use crate::engine::EngineParameters;

/// One match waiting to be played.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledMatch {
    /// Pool this match counts for
    pub pool: u32,
    /// Plays as team `0`
    pub team_1: String,
    /// Plays as team `1`
    pub team_2: String,
    /// Decision budget of each agent
    pub ai_time: Duration,
    /// Match duration
    pub game_time: Duration,
    /// Commands asked per second
    pub commands_per_second: f32,
    /// Where the engine saves the match
    pub save_file: PathBuf,
}

impl ScheduledMatch {
    /// Schedules `team_1` against `team_2` with the timing of `constraints`.
    ///
    /// The save file is `<save_dir>/<team_1>_<team_2>_pool<pool>.json`.
    pub fn new(
        pool: u32,
        team_1: impl Into<String>,
        team_2: impl Into<String>,
        constraints: &Constraints,
        save_dir: &Path,
    ) -> Self {
        let team_1 = team_1.into();
        let team_2 = team_2.into();
        let save_file = save_dir.join(format!("{team_1}_{team_2}_pool{pool}.json"));
        Self {
            pool,
            team_1,
            team_2,
            ai_time: constraints.ai_time,
            game_time: constraints.game_time,
            commands_per_second: constraints.commands_per_second,
            save_file,
        }
    }

    /// What the engine needs to run this match
    pub fn engine_parameters(&self) -> EngineParameters {
        EngineParameters {
            game_time: self.game_time,
            ai_time: self.ai_time,
            commands_per_second: self.commands_per_second,
            save_file: self.save_file.clone(),
        }
    }
}

impl fmt::Display for ScheduledMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[pool {}] {} VS {}", self.pool, self.team_1, self.team_2)
    }
}

/// Outcome of one scheduled match. Exactly one is produced per [`ScheduledMatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// The match that was played
    pub scheduled: ScheduledMatch,
    /// Score of `team_1`
    pub score_1: f32,
    /// Score of `team_2`
    pub score_2: f32,
    /// `None` on draw or abort
    pub winner: Option<String>,
    /// The match did not reach its end
    pub aborted: bool,
    /// Why the match was aborted
    pub message: Option<String>,
}

impl MatchResult {
    /// A match that could not be played to its end.
    pub fn aborted(scheduled: ScheduledMatch, message: impl Into<String>) -> Self {
        Self {
            scheduled,
            score_1: 0.0,
            score_2: 0.0,
            winner: None,
            aborted: true,
            message: Some(message.into()),
        }
    }

    /// Builds the result of a match from its two sessions, `team_1` first.
    ///
    /// The match is aborted if either session is, and then has no winner.
    pub(crate) fn played(scheduled: ScheduledMatch, results: &[AgentResult; 2]) -> Self {
        let aborted = results.iter().any(|r| r.aborted);
        let winner = match results {
            _ if aborted => None,
            [a, b] if a.won && !b.won => Some(a.username.clone()),
            [a, b] if b.won && !a.won => Some(b.username.clone()),
            _ => None,
        };
        let message = aborted.then(|| {
            results
                .iter()
                .filter_map(|r| {
                    let error = r.error.as_ref()?;
                    Some(match &r.blame {
                        Some(blame) => format!("{}: {error} (blame: {blame})", r.username),
                        None => format!("{}: {error}", r.username),
                    })
                })
                .collect::<Vec<_>>()
                .join("; ")
        });

        Self {
            scheduled,
            score_1: results[0].score,
            score_2: results[1].score,
            winner,
            aborted,
            message,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}-{}", self.scheduled, self.score_1, self.score_2)?;
        match (&self.winner, self.aborted) {
            (_, true) => write!(
                f,
                " aborted ({})",
                self.message.as_deref().unwrap_or("no reason given")
            ),
            (Some(winner), false) => write!(f, " winner: {winner}"),
            (None, false) => write!(f, " draw"),
        }
    }
}

/// A group of teams whose matches share one standings table.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    /// Identifies the pool in the pool file
    pub number: u32,
    /// Participants, in declaration order
    pub players: Vec<String>,
    /// Every directed pairing of `players`
    pub matches: Vec<ScheduledMatch>,
    /// Filled as matches complete
    pub results: Vec<MatchResult>,
}

impl Pool {
    /// Builds a pool and schedules its full directed round-robin.
    ///
    /// # Errors
    /// Returned when a team appears twice.
    pub fn round_robin(
        number: u32,
        players: Vec<String>,
        constraints: &Constraints,
        save_dir: &Path,
    ) -> anyhow::Result<Pool> {
        let mut seen = BTreeSet::new();
        for player in &players {
            if !seen.insert(player) {
                bail!("team '{player}' appears twice in pool {number}");
            }
        }

        let mut matches = Vec::with_capacity(players.len() * players.len().saturating_sub(1));
        for team_1 in &players {
            for team_2 in &players {
                if team_1 != team_2 {
                    matches.push(ScheduledMatch::new(
                        number,
                        team_1.clone(),
                        team_2.clone(),
                        constraints,
                        save_dir,
                    ));
                }
            }
        }

        Ok(Pool {
            number,
            players,
            matches,
            results: vec![],
        })
    }

    /// Number of wins of every participant, derived from `results`.
    ///
    /// Draws and aborted matches give no win to anyone.
    pub fn standings(&self) -> BTreeMap<String, u32> {
        let mut wins: BTreeMap<String, u32> =
            self.players.iter().map(|p| (p.clone(), 0)).collect();
        for result in &self.results {
            if let Some(count) = result.winner.as_ref().and_then(|w| wins.get_mut(w)) {
                *count += 1;
            }
        }
        wins
    }

    /// Participants sorted by wins, best first. Ties keep declaration order.
    pub fn ranking(&self) -> Vec<(String, u32)> {
        let standings = self.standings();
        let mut ranking = self
            .players
            .iter()
            .map(|p| (p.clone(), standings.get(p).copied().unwrap_or(0)))
            .collect::<Vec<_>>();
        ranking.sort_by(|a, b| b.1.cmp(&a.1));
        ranking
    }
}

#[derive(Deserialize)]
struct PoolFile {
    pools: Vec<PoolEntry>,
}

#[derive(Deserialize)]
struct PoolEntry {
    pool_number: u32,
    teams: Vec<TeamEntryName>,
}

#[derive(Deserialize)]
struct TeamEntryName {
    team_name: String,
}

/// Reads pools from a JSON document of the form
/// `{"pools": [{"pool_number": 1, "teams": [{"team_name": "a"}, ...]}, ...]}`.
pub fn parse_pools(json: &str, constraints: &Constraints, save_dir: &Path) -> anyhow::Result<Vec<Pool>> {
    let file: PoolFile = serde_json::from_str(json).context("invalid pool file")?;
    let mut numbers = BTreeSet::new();
    let mut pools = Vec::with_capacity(file.pools.len());
    for entry in file.pools {
        if !numbers.insert(entry.pool_number) {
            bail!("pool {} is declared twice", entry.pool_number);
        }
        let players = entry.teams.into_iter().map(|t| t.team_name).collect();
        pools.push(Pool::round_robin(
            entry.pool_number,
            players,
            constraints,
            save_dir,
        )?);
    }
    Ok(pools)
}

/// Same as [`parse_pools`], reading from a file.
pub fn load_pools(
    path: impl AsRef<Path>,
    constraints: &Constraints,
    save_dir: &Path,
) -> anyhow::Result<Vec<Pool>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("could not read pool file {}", path.display()))?;
    let pools = parse_pools(&json, constraints, save_dir)?;
    info!(
        pools = pools.len(),
        matches = pools.iter().map(|p| p.matches.len()).sum::<usize>(),
        "pools loaded from {}",
        path.display()
    );
    Ok(pools)
}
