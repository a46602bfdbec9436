//! Runs one match: one engine instance and the two agent sessions playing against it.
//!
//! The match lives on its own thread. Its outcome is delivered exactly once through a bounded
//! channel, the caller blocks on [`PendingMatch::wait`] without polling.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ScopedJoinHandle};

use anyhow::{anyhow, bail, Context};
use tracing::{info, instrument, warn};

use crate::agent::{AgentIdentity, AgentResult};
use crate::configuration::Configuration;
use crate::decider::{panic_message, DecisionBudget};
use crate::engine::{Engine, EngineParameters, EngineProcess};
use crate::game_interface::{AgentProgram, Scratch};
use crate::session::{run_session, SessionOutcome, SessionState};

/// One side of a match.
#[derive(Debug)]
pub struct Contender {
    /// Name and side
    pub identity: AgentIdentity,
    /// Strategy and fresh scratch data
    pub program: AgentProgram,
}

impl Contender {
    /// Pairs an identity with its program
    pub fn new(identity: AgentIdentity, program: AgentProgram) -> Self {
        Self { identity, program }
    }
}

/// What a match leaves behind, in contender order.
#[derive(Debug)]
pub struct MatchOutcome {
    /// Result of each session
    pub results: [AgentResult; 2],
    /// Final scratch data of each contender, `None` when it could not be recovered
    pub scratch: [Option<Scratch>; 2],
    /// Engine exit code, `None` if killed by a signal or not collected
    pub exit_code: Option<i32>,
}

impl MatchOutcome {
    /// A match is aborted as soon as one of its sessions is.
    pub fn is_aborted(&self) -> bool {
        self.results.iter().any(|r| r.aborted)
    }

    /// Username of the only session that reported a win, if the match was not aborted.
    pub fn winner(&self) -> Option<&str> {
        if self.is_aborted() {
            return None;
        }
        match &self.results {
            [a, b] if a.won && !b.won => Some(&a.username),
            [a, b] if b.won && !a.won => Some(&b.username),
            _ => None,
        }
    }
}

/// A match running on its own thread.
#[derive(Debug)]
pub struct PendingMatch {
    outcome: Receiver<anyhow::Result<MatchOutcome>>,
    handle: JoinHandle<()>,
}

impl PendingMatch {
    /// Blocks until the match is over.
    ///
    /// # Errors
    /// Returned when the engine could not be launched, or the match thread died before
    /// delivering its outcome.
    pub fn wait(self) -> anyhow::Result<MatchOutcome> {
        match self.outcome.recv() {
            Ok(outcome) => {
                let _ = self.handle.join();
                outcome
            }
            Err(_) => match self.handle.join() {
                Err(payload) => Err(anyhow!(
                    "match thread panicked: {}",
                    panic_message(&*payload)
                )),
                Ok(()) => Err(anyhow!("match thread exited without an outcome")),
            },
        }
    }
}

/// Starts a match between `contenders` on an engine listening on `port`.
///
/// # Errors
/// Fails immediately if both contenders share a username or a team, or if the match thread
/// cannot be spawned.
pub fn spawn_match(
    engine: Arc<dyn Engine>,
    config: &Configuration,
    parameters: EngineParameters,
    port: u16,
    contenders: [Contender; 2],
) -> anyhow::Result<PendingMatch> {
    let [first, second] = &contenders;
    if first.identity.username == second.identity.username {
        bail!(
            "both contenders are named '{}', usernames must differ",
            first.identity.username
        );
    }
    if first.identity.team == second.identity.team {
        bail!("both contenders play for team {}", first.identity.team);
    }

    let (tx, rx) = mpsc::sync_channel(1);
    let config = config.clone();
    let handle = thread::Builder::new()
        .name(format!("match-{port}"))
        .spawn(move || {
            let outcome = run_match(engine.as_ref(), &config, &parameters, port, contenders);
            // the caller may have stopped waiting
            let _ = tx.send(outcome);
        })
        .context("could not spawn match thread")?;

    Ok(PendingMatch {
        outcome: rx,
        handle,
    })
}

#[instrument(skip_all, fields(port = port, save_file = %parameters.save_file.display()))]
fn run_match(
    engine: &dyn Engine,
    config: &Configuration,
    parameters: &EngineParameters,
    port: u16,
    contenders: [Contender; 2],
) -> anyhow::Result<MatchOutcome> {
    let mut process = engine
        .launch(parameters, port)
        .context("could not launch engine")?;

    // no readiness check: the engine is given a fixed delay to start listening
    thread::sleep(config.settle_delay);

    let budget = DecisionBudget::new(parameters.ai_time);
    let address = config.address;
    let [first, second] = contenders;
    let identities = [first.identity.clone(), second.identity.clone()];

    let sessions = thread::scope(|scope| -> anyhow::Result<[SessionOutcome; 2]> {
        let (done_tx, done_rx) = mpsc::channel::<(usize, SessionOutcome)>();
        let spawn = |index: usize, contender: Contender| {
            let done = done_tx.clone();
            thread::Builder::new()
                .name(format!("session-{}", contender.identity.username))
                .spawn_scoped(scope, move || {
                    let outcome = run_session(
                        address,
                        port,
                        contender.identity,
                        contender.program,
                        budget,
                    );
                    let _ = done.send((index, outcome));
                })
                .context("could not spawn session thread")
        };

        let first = match spawn(0, first) {
            Ok(handle) => handle,
            Err(e) => {
                kill(process.as_mut());
                return Err(e);
            }
        };
        let second = match spawn(1, second) {
            Ok(handle) => handle,
            Err(e) => {
                // closing the engine releases the session already connected
                kill(process.as_mut());
                let _ = first.join();
                return Err(e);
            }
        };
        drop(done_tx);

        let mut outcomes: [Option<SessionOutcome>; 2] = [None, None];
        let mut engine_killed = false;
        for (index, outcome) in done_rx {
            // a session that never reached the engine leaves it waiting for a client forever
            if !outcome.state.is_terminal() && !engine_killed {
                warn!(
                    agent = %outcome.result.username,
                    "session did not reach the engine, stopping the match"
                );
                kill(process.as_mut());
                engine_killed = true;
            }
            outcomes[index] = Some(outcome);
        }

        let [first_outcome, second_outcome] = outcomes;
        Ok([
            collect_session(first, first_outcome, &identities[0]),
            collect_session(second, second_outcome, &identities[1]),
        ])
    })?;

    let exit_code = match process.wait() {
        Ok(code) => code,
        Err(e) => {
            warn!("could not wait for engine: {e:#}");
            None
        }
    };
    info!(?exit_code, "engine exited");

    let [first, second] = sessions;
    Ok(MatchOutcome {
        results: [first.result, second.result],
        scratch: [first.scratch, second.scratch],
        exit_code,
    })
}

/// Joins a session thread. A session that did not report its outcome panicked.
fn collect_session(
    handle: ScopedJoinHandle<'_, ()>,
    outcome: Option<SessionOutcome>,
    identity: &AgentIdentity,
) -> SessionOutcome {
    let joined = handle.join();
    if let Some(outcome) = outcome {
        return outcome;
    }
    let message = match joined {
        Err(payload) => format!("session panicked: {}", panic_message(&*payload)),
        Ok(()) => "session ended without an outcome".to_owned(),
    };
    warn!(agent = %identity.username, "{message}");
    SessionOutcome {
        result: AgentResult::aborted(identity, message, None),
        state: SessionState::Aborted,
        scratch: None,
    }
}

fn kill(process: &mut dyn EngineProcess) {
    if let Err(e) = process.kill() {
        warn!("could not kill engine: {e:#}");
    }
}
