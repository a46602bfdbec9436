use std::process::{Child, ExitStatus};
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::warn;

use super::{ProcessSpec, ResourceLimits};

/// A child process. Resource limits are not available outside of linux.
#[derive(Debug)]
pub struct LimitedProcess {
    child: Child,
    exited: bool,
}

impl LimitedProcess {
    /// Always fails: cgroups only exist on linux.
    pub fn launch(_spec: &ProcessSpec, _limits: &ResourceLimits) -> anyhow::Result<LimitedProcess> {
        bail!("cgroups only available on linux")
    }

    /// Spawns `spec` without any resource limit.
    pub fn launch_without_container(spec: &ProcessSpec) -> anyhow::Result<LimitedProcess> {
        Ok(LimitedProcess {
            child: spec.spawn()?,
            exited: false,
        })
    }

    /// OS process id
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Blocks until the process exits.
    pub fn wait(&mut self) -> anyhow::Result<ExitStatus> {
        let status = self.child.wait().context("could not wait for process")?;
        self.exited = true;
        Ok(status)
    }

    /// Kills the process.
    pub fn try_kill(&mut self, _max_duration: Duration) -> anyhow::Result<()> {
        if !self.exited {
            self.child.kill().context("could not kill process")?;
            let _ = self.child.wait();
            self.exited = true;
        }
        Ok(())
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.try_kill(Duration::from_secs(1)) {
            warn!("could not stop process {} on drop: {e:#}", self.child.id());
        }
    }
}
