//! Process launching, optionally inside a cgroup limiting memory and CPUs.

#[cfg(target_os = "linux")]
mod cgroup_manager_linux;
#[cfg(target_os = "linux")]
pub use cgroup_manager_linux::*;

#[cfg(not(target_os = "linux"))]
mod cgroup_manager_stub;
#[cfg(not(target_os = "linux"))]
pub use cgroup_manager_stub::*;

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use anyhow::Context;

/// Limits of a contained process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// In bytes
    pub max_memory: Option<usize>,
    /// Cpu list such as `"0-3,6"`, empty when unrestricted
    pub cpus: String,
}

impl ResourceLimits {
    /// Nothing to enforce, no cgroup needed
    pub fn is_unlimited(&self) -> bool {
        self.max_memory.is_none() && self.cpus.is_empty()
    }
}

/// A command line to run in the background.
///
/// Stdin and stdout are always detached: a process started this way is only reached through the
/// network. Stderr is inherited when `forward_stderr` is set.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Executable to run
    pub program: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Inherit stderr instead of discarding it
    pub forward_stderr: bool,
}

impl ProcessSpec {
    fn spawn(&self) -> anyhow::Result<Child> {
        let stderr = if self.forward_stderr {
            Stdio::inherit()
        } else {
            Stdio::null()
        };
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("could not run '{}'", self.program.display()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> ProcessSpec {
        ProcessSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            forward_stderr: false,
        }
    }

    #[test]
    fn test_exit_code() {
        let mut process = LimitedProcess::launch_without_container(&shell("exit 3")).unwrap();
        assert_eq!(process.wait().unwrap().code(), Some(3));
    }

    #[test]
    fn test_kill() {
        let mut process = LimitedProcess::launch_without_container(&shell("sleep 30")).unwrap();
        process.try_kill(std::time::Duration::from_secs(1)).unwrap();
        // killing twice is harmless
        process.try_kill(std::time::Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_missing_program() {
        let spec = ProcessSpec {
            program: PathBuf::from("/no/such/program"),
            args: vec![],
            forward_stderr: false,
        };
        assert!(LimitedProcess::launch_without_container(&spec).is_err());
    }

    #[test]
    fn test_limits() {
        assert!(ResourceLimits::default().is_unlimited());
        let limits = ResourceLimits {
            max_memory: Some(1_000_000),
            cpus: String::new(),
        };
        assert!(!limits.is_unlimited());
    }
}
