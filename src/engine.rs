//! Launching the game engine.
//!
//! The engine is an external process reached only through its port and its exit code. The
//! [`Engine`] trait is the seam between the match runner and the actual process, so that a
//! different launcher (or an in-process fake) can be plugged in.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::cgroup_manager::{LimitedProcess, ProcessSpec, ResourceLimits};
use crate::configuration::Configuration;
use crate::constraints::Constraints;

/// What the engine needs to know to run one match.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParameters {
    /// Match duration
    pub game_time: Duration,
    /// Decision budget of each agent
    pub ai_time: Duration,
    /// How many commands each agent is asked for per second
    pub commands_per_second: f32,
    /// Where the engine writes its save file
    pub save_file: PathBuf,
}

/// A running engine instance.
pub trait EngineProcess: Send {
    /// Blocks until the engine exits. Returns its exit code, `None` if it was killed by a signal.
    fn wait(&mut self) -> anyhow::Result<Option<i32>>;

    /// Stops the engine.
    fn kill(&mut self) -> anyhow::Result<()>;
}

/// Something able to start an engine listening on a given port.
pub trait Engine: Send + Sync {
    /// Starts one engine instance listening on `port`.
    fn launch(
        &self,
        parameters: &EngineParameters,
        port: u16,
    ) -> anyhow::Result<Box<dyn EngineProcess>>;
}

/// The engine shipped as a jar, run through a java runtime in windowless mode.
#[derive(Debug, Clone)]
pub struct JarEngine {
    runtime: PathBuf,
    jar: PathBuf,
    limits: ResourceLimits,
    allow_uncontained: bool,
    debug_stderr: bool,
}

impl JarEngine {
    /// `runtime` is the java executable, `jar` the engine archive.
    ///
    /// Memory and cpu limits are taken from `constraints`, the containment policy from `config`.
    pub fn new(
        runtime: impl Into<PathBuf>,
        jar: impl Into<PathBuf>,
        constraints: &Constraints,
        config: &Configuration,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            jar: jar.into(),
            limits: ResourceLimits {
                max_memory: constraints.engine_ram,
                cpus: constraints.engine_cpus.clone(),
            },
            allow_uncontained: config.allow_uncontained,
            debug_stderr: config.debug_engine_stderr,
        }
    }

    /// Arguments given to the runtime.
    pub fn arguments(&self, parameters: &EngineParameters, port: u16) -> Vec<String> {
        vec![
            "-jar".to_string(),
            self.jar.display().to_string(),
            "-m".to_string(),
            "windowless".to_string(),
            "-f".to_string(),
            parameters.save_file.display().to_string(),
            "-t".to_string(),
            seconds(parameters.game_time),
            "-a".to_string(),
            seconds(parameters.ai_time),
            "-c".to_string(),
            parameters.commands_per_second.to_string(),
            "-p".to_string(),
            port.to_string(),
        ]
    }
}

fn seconds(duration: Duration) -> String {
    format!("{:.1}", duration.as_secs_f64())
}

impl Engine for JarEngine {
    #[instrument(skip_all, fields(port = port, save_file = %parameters.save_file.display()))]
    fn launch(
        &self,
        parameters: &EngineParameters,
        port: u16,
    ) -> anyhow::Result<Box<dyn EngineProcess>> {
        create_parent_dir(&parameters.save_file)?;

        let spec = ProcessSpec {
            program: self.runtime.clone(),
            args: self.arguments(parameters, port),
            forward_stderr: self.debug_stderr,
        };

        let process = if self.limits.is_unlimited() {
            LimitedProcess::launch_without_container(&spec)?
        } else {
            match LimitedProcess::launch(&spec, &self.limits) {
                Ok(process) => process,
                Err(e) if self.allow_uncontained => {
                    warn!("could not contain engine ({e:#}), launching it uncontained");
                    LimitedProcess::launch_without_container(&spec)?
                }
                Err(e) => {
                    return Err(e.context(
                        "engine containment failed (allow uncontained execution to skip it)",
                    ))
                }
            }
        };
        info!(pid = process.id(), "engine launched");

        Ok(Box::new(JarProcess { process }))
    }
}

fn create_parent_dir(path: &Path) -> anyhow::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("could not create save directory {}", dir.display())),
        _ => Ok(()),
    }
}

struct JarProcess {
    process: LimitedProcess,
}

impl fmt::Debug for JarProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JarProcess({})", self.process.id())
    }
}

impl EngineProcess for JarProcess {
    fn wait(&mut self) -> anyhow::Result<Option<i32>> {
        let status = self.process.wait()?;
        Ok(status.code())
    }

    fn kill(&mut self) -> anyhow::Result<()> {
        self.process.try_kill(Duration::from_secs(1))
    }
}
