//! Config for the evaluator behaviors
//!
//! This module provides configuration options for controlling the behavior of the evaluator.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive, set the value to `"true"` to enable one.
//!
//! - `EVAL_VERBOSE`: Print match progress and standings (default: `true`)
//! - `EVAL_LOG`: Enable logging to a file (default: `false`)
//! - `EVAL_ALLOW_UNCONTAINED`: Run the engine without cgroup when containment fails (default: `false`)
//! - `EVAL_DEBUG_ENGINE_STDERR`: Forward engine stderr for debugging (default: `false`)
//! - `EVAL_WORKERS`: Number of matches run in parallel (default: physical CPU count)
//! - `EVAL_BASE_PORT`: Port of the first worker, worker `i` uses `base + i` (default: `2049`)
//! - `EVAL_ADDRESS`: Address the engine listens on (default: `127.0.0.1`)
//! - `EVAL_SETTLE_DELAY_MS`: Delay between engine launch and agent connection (default: `1000`)
//! - `EVAL_SAVE_DIR`: Directory of the engine save files (default: `game_saves`)

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for evaluator behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) allow_uncontained: bool,
    pub(crate) debug_engine_stderr: bool,
    pub(crate) workers: usize,
    pub(crate) base_port: u16,
    pub(crate) address: IpAddr,
    pub(crate) settle_delay: Duration,
    pub(crate) save_dir: PathBuf,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The evaluator will print match progress to stdout.
    /// - Logging to file is disabled.
    /// - The engine is not started if it cannot be contained (only matters with engine limits).
    /// - Engine stderr output is disabled
    /// - One worker per physical CPU, on ports 2049 and up
    /// - Agents connect to 127.0.0.1, one second after the engine is launched
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            allow_uncontained: false,
            debug_engine_stderr: false,
            workers: num_cpus::get_physical().max(1),
            base_port: 2049,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            settle_delay: Duration::from_secs(1),
            save_dir: PathBuf::from("game_saves"),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the module documentation for the recognized variables. Any other value (including
    /// unset or unparsable) will result in using the default value for each field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let default = Self::new();
        Self {
            verbose: get_env_flag("EVAL_VERBOSE", default.verbose),
            log: get_env_flag("EVAL_LOG", default.log),
            allow_uncontained: get_env_flag("EVAL_ALLOW_UNCONTAINED", default.allow_uncontained),
            debug_engine_stderr: get_env_flag(
                "EVAL_DEBUG_ENGINE_STDERR",
                default.debug_engine_stderr,
            ),
            workers: get_env::<usize>("EVAL_WORKERS")
                .filter(|&n| n > 0)
                .unwrap_or(default.workers),
            base_port: get_env("EVAL_BASE_PORT").unwrap_or(default.base_port),
            address: get_env("EVAL_ADDRESS").unwrap_or(default.address),
            settle_delay: get_env("EVAL_SETTLE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.settle_delay),
            save_dir: std::env::var("EVAL_SAVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.save_dir),
        }
    }

    /// Enable or disable console progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Allow launching the engine without cgroup when containment is not available.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    /// Enable or disable engine stderr output (debug purposes only).
    pub fn with_debug_engine_stderr(mut self, value: bool) -> Self {
        self.debug_engine_stderr = value;
        self
    }

    /// Number of worker threads, each running one match at a time.
    ///
    /// # Panics
    /// If `count` is zero.
    pub fn with_workers(mut self, count: usize) -> Self {
        assert!(count > 0, "at least one worker is needed");
        self.workers = count;
        self
    }

    /// Port used by the first worker. Worker `i` uses `base_port + i`.
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    /// Address the engine listens on.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Delay between the engine launch and the agents connection.
    ///
    /// The engine must be listening when the agents connect; there is no readiness check.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Directory where the engine writes save files.
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = dir.into();
        self
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Port of the first worker
    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Directory where save files go
    pub fn save_dir(&self) -> &std::path::Path {
        &self.save_dir
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = Configuration::new()
            .with_verbose(false)
            .with_workers(3)
            .with_base_port(5000)
            .with_settle_delay(Duration::from_millis(5))
            .with_save_dir("/tmp/saves");
        assert!(!config.verbose);
        assert_eq!(config.workers(), 3);
        assert_eq!(config.base_port(), 5000);
        assert_eq!(config.settle_delay, Duration::from_millis(5));
        assert_eq!(config.save_dir(), std::path::Path::new("/tmp/saves"));
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert!(config.verbose);
        assert!(!config.log);
        assert!(config.workers() >= 1);
        assert_eq!(config.base_port(), 2049);
        assert_eq!(config.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    #[should_panic]
    fn test_zero_workers() {
        let _ = Configuration::new().with_workers(0);
    }
}
