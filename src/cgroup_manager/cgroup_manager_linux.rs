use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use cgroups_rs::cgroup_builder::CgroupBuilder;
use cgroups_rs::{Cgroup, CgroupPid};
use tracing::{debug, warn};

use super::{ProcessSpec, ResourceLimits};

/// Path of a new cgroup delegated to the current user by systemd.
fn user_cgroup_path(group_name: &str) -> anyhow::Result<String> {
    let output = std::process::Command::new("id")
        .arg("-u")
        .output()
        .context("could not run 'id -u'")?;
    let uid = std::str::from_utf8(&output.stdout).context("user id is not valid utf-8")?;
    let uid = uid.trim();
    Ok(format!(
        "user.slice/user-{uid}.slice/user@{uid}.service/{group_name}"
    ))
}

fn build_cgroup(path: &str, limits: &ResourceLimits) -> anyhow::Result<Cgroup> {
    let mut builder = CgroupBuilder::new(path);
    if let Some(bytes) = limits.max_memory {
        let bytes = i64::try_from(bytes).context("memory limit too large")?;
        builder = builder.memory().memory_hard_limit(bytes).done();
    }
    if !limits.cpus.is_empty() {
        builder = builder.cpu().cpus(limits.cpus.clone()).done();
    }
    builder
        .build(cgroups_rs::hierarchies::auto())
        .context("could not create cgroup")
}

/// Polls until `pid` left `cgroup`.
fn wait_until_gone(cgroup: &Cgroup, pid: u64, max_duration: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + max_duration;
    while cgroup.tasks().iter().any(|task| task.pid == pid) {
        if Instant::now() > deadline {
            bail!("process {pid} still in its cgroup after {max_duration:?}");
        }
        std::thread::sleep(Duration::from_millis(10).min(max_duration / 10));
    }
    Ok(())
}

/// A child process, possibly confined in its own cgroup.
///
/// Killed (and its cgroup removed) on drop if it is still running.
#[derive(Debug)]
pub struct LimitedProcess {
    child: Child,
    cgroup: Option<Cgroup>,
    exited: bool,
}

impl LimitedProcess {
    /// Spawns `spec` in a fresh cgroup enforcing `limits`.
    pub fn launch(spec: &ProcessSpec, limits: &ResourceLimits) -> anyhow::Result<LimitedProcess> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let group_name = format!(
            "ARENA_ENGINE_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = user_cgroup_path(&group_name)?;
        let cgroup = build_cgroup(&path, limits)?;

        let mut child = match spec.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = cgroup.delete();
                return Err(e);
            }
        };
        let pid = u64::from(child.id());
        if let Err(e) = cgroup.add_task_by_tgid(CgroupPid { pid }) {
            let _ = child.kill();
            let _ = child.wait();
            let _ = cgroup.delete();
            return Err(e).context("could not move the process into its cgroup");
        }
        debug!(pid, %path, "process contained");

        Ok(LimitedProcess {
            child,
            cgroup: Some(cgroup),
            exited: false,
        })
    }

    /// Spawns `spec` without any resource limit.
    pub fn launch_without_container(spec: &ProcessSpec) -> anyhow::Result<LimitedProcess> {
        Ok(LimitedProcess {
            child: spec.spawn()?,
            cgroup: None,
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
        self.remove_cgroup();
        Ok(status)
    }

    /// Kills the process (and anything it spawned in its cgroup).
    pub fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        if !self.exited {
            match &self.cgroup {
                Some(cgroup) => {
                    cgroup.kill().context("could not kill cgroup")?;
                    wait_until_gone(cgroup, u64::from(self.child.id()), max_duration)?;
                }
                None => self.child.kill().context("could not kill process")?,
            }
            // reap the zombie
            let _ = self.child.wait();
            self.exited = true;
        }
        self.remove_cgroup();
        Ok(())
    }

    fn remove_cgroup(&mut self) {
        if let Some(cgroup) = self.cgroup.take() {
            if let Err(e) = cgroup.delete() {
                warn!("could not remove cgroup {}: {e}", cgroup.path());
            }
        }
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.try_kill(Duration::from_secs(1)) {
            warn!("could not stop process {} on drop: {e:#}", self.child.id());
        }
    }
}
