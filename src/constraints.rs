//! Defines the timing of matches and the resources given to each engine instance.
//!
//! # Overview
//!
//! The main entry point is the [`ConstraintsBuilder`] struct, which uses a builder pattern:
//!
//! - **Timing**:
//!   * match duration ("game time")
//!   * total think time of each agent across a match ("AI time", the decision budget)
//!   * number of commands asked per second
//! - **Engine resources**: RAM limit and CPU list, enforced with Linux cgroups v2
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use arena_tournament::constraints::ConstraintsBuilder;
//!
//! let constraints = ConstraintsBuilder::new()
//!     .with_game_time(Duration::from_secs(60))
//!     .with_ai_time(Duration::from_secs(150))
//!     .with_commands_per_second(4.0)
//!     .with_engine_ram(2_000)
//!     .with_engine_cpu_list("0-3")
//!     .build()
//!     .unwrap();
//! ```
//!
//! You may also construct constraints from environment variables using
//! [`ConstraintsBuilder::from_env()`] for runtime configurability.

use std::{collections::BTreeSet, env, time::Duration};

use anyhow::{bail, Context};

const DEFAULT_AI_TIME: Duration = Duration::from_secs(150);
const DEFAULT_GAME_TIME: Duration = Duration::from_secs(60);
const DEFAULT_COMMANDS_PER_SECOND: f32 = 4.0;

/// A builder for match timing and engine resource limits.
///
/// By default, matches last 60 seconds, each agent has 150 seconds of thinking time, 4 commands
/// are asked per second and the engine runs without resource limits.
#[derive(Debug, Default)]
pub struct ConstraintsBuilder {
    ai_time: Option<Duration>,
    game_time: Option<Duration>,
    commands_per_second: Option<f32>,
    engine_ram: Option<usize>,
    engine_cpus: Option<String>,
}

impl ConstraintsBuilder {
    /// Creates a new `ConstraintsBuilder` with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `ConstraintsBuilder` configured from environment variables.
    ///
    /// Read environment variables are:
    /// - `AI_TIME_SECS` (f64): decision budget per agent, in seconds
    /// - `GAME_TIME_SECS` (f64): match duration, in seconds
    /// - `COMMANDS_PER_SECOND` (f32)
    /// - `ENGINE_RAM` (usize): maximum engine RAM in MB
    /// - `ENGINE_CPU_LIST` (string): comma-separated list or ranges of CPUs, e.g. "0-3,6"
    ///
    /// Unset or unparsable variables keep their default value.
    #[must_use]
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            env::var(var).ok()?.trim().parse().ok()
        }

        fn parse_duration_secs(var: &str) -> Option<Duration> {
            parse::<f64>(var).and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        }

        ConstraintsBuilder {
            ai_time: parse_duration_secs("AI_TIME_SECS"),
            game_time: parse_duration_secs("GAME_TIME_SECS"),
            commands_per_second: parse("COMMANDS_PER_SECOND"),
            engine_ram: parse("ENGINE_RAM"),
            engine_cpus: env::var("ENGINE_CPU_LIST").ok(),
        }
    }

    /// Sets the total clock-time an agent may spend deciding, across the entire match.
    #[must_use]
    pub fn with_ai_time(self, duration: Duration) -> Self {
        Self {
            ai_time: Some(duration),
            ..self
        }
    }

    /// Sets the duration of a match.
    #[must_use]
    pub fn with_game_time(self, duration: Duration) -> Self {
        Self {
            game_time: Some(duration),
            ..self
        }
    }

    /// Sets how many commands the engine asks each agent per second.
    #[must_use]
    pub fn with_commands_per_second(self, rate: f32) -> Self {
        Self {
            commands_per_second: Some(rate),
            ..self
        }
    }

    /// Sets the maximum RAM of each engine instance (in MB).
    #[must_use]
    pub fn with_engine_ram(self, max: usize) -> Self {
        Self {
            engine_ram: Some(max),
            ..self
        }
    }

    /// Sets the CPUs engine instances may run on.
    ///
    /// Format follows the pattern: `"0-3,6,8"` (inclusive ranges and individual IDs).
    #[must_use]
    pub fn with_engine_cpu_list(self, cpus: &str) -> Self {
        Self {
            engine_cpus: Some(cpus.to_string()),
            ..self
        }
    }

    /// Consumes the builder and returns the constructed `Constraints`.
    ///
    /// # Errors
    ///
    /// Returned when constraints are impossible: empty match, non-positive command rate,
    /// unparsable cpu list, or an engine RAM larger than the memory available on this machine.
    pub fn build(self) -> anyhow::Result<Constraints> {
        let ai_time = self.ai_time.unwrap_or(DEFAULT_AI_TIME);
        let game_time = self.game_time.unwrap_or(DEFAULT_GAME_TIME);
        if game_time.is_zero() {
            bail!("game time must be positive");
        }

        let commands_per_second = self
            .commands_per_second
            .unwrap_or(DEFAULT_COMMANDS_PER_SECOND);
        if !(commands_per_second.is_finite() && commands_per_second > 0.0) {
            bail!("commands per second must be positive, got {commands_per_second}");
        }

        let engine_ram = match self.engine_ram {
            Some(mb) => {
                let mut sys = sysinfo::System::new();
                sys.refresh_memory();
                let available = sys.available_memory() as usize;
                let bytes = mb.saturating_mul(1_000_000);
                if bytes > available {
                    bail!(
                        "Engine RAM size ({mb}MB) is greater than available RAM ({}MB)",
                        available / 1_000_000
                    );
                }
                Some(bytes)
            }
            None => None,
        };

        let engine_cpus = match self.engine_cpus {
            Some(list) => {
                let cpus = cpu_list_to_set(&list).context("error parsing cpu list")?;
                cpus.iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            }
            None => String::new(),
        };

        Ok(Constraints {
            ai_time,
            game_time,
            commands_per_second,
            engine_ram,
            engine_cpus,
        })
    }
}

fn cpu_list_to_set(s: &str) -> anyhow::Result<BTreeSet<u16>> {
    if s.trim().is_empty() {
        bail!("Empty string");
    }
    let mut set = BTreeSet::new();
    for item in s.split(',') {
        let item = item.trim();
        let bounds = item.split('-').collect::<Vec<_>>();
        match bounds.as_slice() {
            [value] => {
                let value: u16 = value
                    .parse()
                    .with_context(|| format!("could not parse {value}"))?;
                set.insert(value);
            }
            [start, end] => {
                let start: u16 = start
                    .parse()
                    .with_context(|| format!("could not parse {start}"))?;
                let end: u16 = end
                    .parse()
                    .with_context(|| format!("could not parse {end}"))?;
                let range = if start <= end {
                    start..=end
                } else {
                    end..=start
                };
                set.extend(range);
            }
            _ => bail!(
                "each comma-separated item must be a number or a range (e.g. '0-3'), got '{item}'"
            ),
        }
    }
    Ok(set)
}

/// Obtained using `ConstraintsBuilder`
#[derive(Clone, Debug, PartialEq)]
pub struct Constraints {
    pub(crate) ai_time: Duration,
    pub(crate) game_time: Duration,
    pub(crate) commands_per_second: f32,
    /// in bytes
    pub(crate) engine_ram: Option<usize>,
    /// normalized cpu list, empty when unrestricted
    pub(crate) engine_cpus: String,
}

impl Constraints {
    /// Decision budget of each agent
    pub fn ai_time(&self) -> Duration {
        self.ai_time
    }

    /// Match duration
    pub fn game_time(&self) -> Duration {
        self.game_time
    }

    /// Commands asked per second
    pub fn commands_per_second(&self) -> f32 {
        self.commands_per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let constraints = ConstraintsBuilder::new().build().unwrap();
        assert_eq!(constraints.ai_time(), Duration::from_secs(150));
        assert_eq!(constraints.game_time(), Duration::from_secs(60));
        assert_eq!(constraints.commands_per_second(), 4.0);
        assert_eq!(constraints.engine_ram, None);
        assert!(constraints.engine_cpus.is_empty());
    }

    #[test]
    fn test_cpu_list() {
        let set = cpu_list_to_set("3-1, 6,8").unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 6, 8]);
        assert!(cpu_list_to_set("").is_err());
        assert!(cpu_list_to_set("1-2-3").is_err());
        assert!(cpu_list_to_set("a").is_err());

        let constraints = ConstraintsBuilder::new()
            .with_engine_cpu_list("2,0-1")
            .build()
            .unwrap();
        assert_eq!(constraints.engine_cpus, "0,1,2");
    }

    #[test]
    fn test_impossible_constraints() {
        assert!(ConstraintsBuilder::new()
            .with_game_time(Duration::ZERO)
            .build()
            .is_err());
        assert!(ConstraintsBuilder::new()
            .with_commands_per_second(0.0)
            .build()
            .is_err());
        assert!(ConstraintsBuilder::new()
            .with_commands_per_second(f32::NAN)
            .build()
            .is_err());
        assert!(ConstraintsBuilder::new()
            .with_engine_ram(usize::MAX / 2_000_000)
            .build()
            .is_err());
    }
}
