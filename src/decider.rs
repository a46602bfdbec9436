//! Runs a strategy on its own thread so that every call can be bounded by what is left of the
//! agent's decision budget.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{trace, warn};

use crate::game_interface::{AgentProgram, Command, GameSnapshot, Scratch};

/// Cumulative thinking time of one agent for one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionBudget {
    remaining: Duration,
}

impl DecisionBudget {
    /// A full budget of `total`
    pub fn new(total: Duration) -> Self {
        Self { remaining: total }
    }

    /// Thinking time left
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Never goes below zero
    pub fn charge(&mut self, elapsed: Duration) {
        self.remaining = self.remaining.saturating_sub(elapsed);
    }

    /// No thinking time left
    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_zero()
    }
}

type Reply = Result<Command, String>;

/// Owns the strategy thread of one session.
pub(crate) struct Decider {
    requests: Option<Sender<GameSnapshot>>,
    replies: Receiver<Reply>,
    handle: Option<JoinHandle<Scratch>>,
    /// a call outlived its deadline, the thread still owns the scratch data
    overdue: bool,
}

impl Decider {
    pub fn spawn(name: &str, program: AgentProgram) -> anyhow::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<GameSnapshot>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();
        let AgentProgram {
            strategy,
            mut scratch,
        } = program;

        let handle = thread::Builder::new()
            .name(format!("strategy-{name}"))
            .spawn(move || {
                while let Ok(snapshot) = request_rx.recv() {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| strategy(&snapshot, &mut scratch)));
                    let reply = match outcome {
                        Ok(Ok(command)) => Ok(command),
                        Ok(Err(e)) => Err(format!("strategy error: {e:#}")),
                        Err(payload) => Err(format!("strategy panicked: {}", panic_message(&*payload))),
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                scratch
            })
            .context("could not spawn strategy thread")?;

        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            handle: Some(handle),
            overdue: false,
        })
    }

    /// Asks the strategy for a command within what is left of `budget`.
    ///
    /// Never fails: any fault of the strategy is turned into [`Command::Invalid`]. The budget is
    /// charged for the wall time spent waiting.
    pub fn decide(&mut self, snapshot: GameSnapshot, budget: &mut DecisionBudget) -> Command {
        if self.overdue || budget.is_exhausted() {
            return Command::invalid("decision budget exhausted");
        }
        let Some(requests) = &self.requests else {
            return Command::invalid("strategy thread is gone");
        };

        let start = Instant::now();
        if requests.send(snapshot).is_err() {
            return Command::invalid("strategy thread is gone");
        }
        let reply = self.replies.recv_timeout(budget.remaining());
        budget.charge(start.elapsed());

        match reply {
            Ok(Ok(command)) => match command.validate() {
                Ok(command) => command,
                Err(e) => Command::invalid(format!("strategy returned an invalid command: {e}")),
            },
            Ok(Err(message)) => {
                warn!("{message}");
                Command::invalid(message)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("strategy exceeded its decision budget");
                self.overdue = true;
                // the call may finish slightly after the deadline, but the budget is spent anyway
                budget.charge(budget.remaining());
                Command::invalid("decision budget exhausted")
            }
            Err(RecvTimeoutError::Disconnected) => Command::invalid("strategy thread is gone"),
        }
    }

    /// Stops the strategy thread and gives back the scratch data.
    ///
    /// Returns `None` when a call is still running past its deadline: the thread is then left
    /// detached and keeps the data.
    pub fn finish(mut self) -> Option<Scratch> {
        self.requests = None;
        let handle = self.handle.take()?;
        if self.overdue && !handle.is_finished() {
            trace!("strategy thread still busy, detaching it");
            return None;
        }
        handle.join().ok()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
