//! One agent's side of one match.
//!
//! A session connects to the engine, sends its identity, then answers every `ASK_COMMAND` with a
//! command computed by the agent's strategy until the engine sends `GAME_FINISHED` or `ABORT`.
//!
//! Faults of the strategy never reach the transport: they are sent to the engine as an
//! `INVALID` command. Connection and protocol errors end the session, which is then reported as
//! aborted.

use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};

use tracing::{debug, info, instrument, trace, warn};

use crate::agent::{AgentIdentity, AgentResult};
use crate::decider::{Decider, DecisionBudget};
use crate::error::{ProtocolError, SessionError};
use crate::game_interface::{AgentProgram, Scratch};
use crate::protocol::{encode_command, parse_message, EngineMessage, ScoreEntry};

/// Where a session stands in the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected, or the connection could not be opened
    Disconnected,
    /// Handshake sent
    Connected,
    /// Waiting for the engine
    AwaitingMessage,
    /// The strategy is deciding
    DecisionRequested,
    /// Answer written, the engine has not replied yet
    CommandSent,
    /// `GAME_FINISHED` received
    Finished,
    /// `ABORT` received, or the session failed
    Aborted,
}

impl SessionState {
    /// `Finished` or `Aborted`
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Aborted)
    }
}

/// What a session leaves behind.
#[derive(Debug)]
pub struct SessionOutcome {
    /// How the session ended
    pub result: AgentResult,
    /// Last state reached, [`SessionState::Disconnected`] if the engine could not be reached
    pub state: SessionState,
    /// `None` if the strategy thread was still running past its deadline at the end of the match
    pub scratch: Option<Scratch>,
}

/// A live connection to the engine.
#[derive(Debug)]
pub struct AgentSession {
    identity: AgentIdentity,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    state: SessionState,
}

impl AgentSession {
    /// Opens the connection and sends the handshake: the username, then the team id, each on
    /// its own line.
    ///
    /// # Errors
    /// [`SessionError::Connection`] if the engine cannot be reached or the handshake cannot be
    /// written.
    #[instrument(skip_all, fields(agent = %identity.username))]
    pub fn connect(
        address: IpAddr,
        port: u16,
        identity: AgentIdentity,
    ) -> Result<AgentSession, SessionError> {
        let addr = SocketAddr::new(address, port);
        let mut writer = TcpStream::connect(addr).map_err(SessionError::Connection)?;
        writer.set_nodelay(true).map_err(SessionError::Connection)?;
        let reader = BufReader::new(writer.try_clone().map_err(SessionError::Connection)?);

        let handshake = format!("{}\n{}\n", identity.username, identity.team.id());
        writer
            .write_all(handshake.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(SessionError::Connection)?;
        debug!("connected to {addr} as team {}", identity.team);

        Ok(AgentSession {
            identity,
            reader,
            writer,
            state: SessionState::Connected,
        })
    }

    /// Current protocol state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Who this session plays for
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Reads the next message, skipping the blank lines the engine sends after each one.
    ///
    /// # Errors
    /// [`ProtocolError::ConnectionClosed`] on end of stream, or any parsing error of
    /// [`parse_message`].
    pub fn receive(&mut self) -> Result<EngineMessage, ProtocolError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            if !line.trim().is_empty() {
                return parse_message(line.trim_end());
            }
        }
    }

    fn send_command(&mut self, line: &str) -> Result<(), ProtocolError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Plays until the engine ends the match or the connection breaks.
    ///
    /// Always returns a result: protocol errors are reported as an aborted [`AgentResult`].
    #[instrument(skip_all, fields(agent = %self.identity.username))]
    pub fn play(mut self, program: AgentProgram, mut budget: DecisionBudget) -> SessionOutcome {
        let mut decider = match Decider::spawn(&self.identity.username, program) {
            Ok(decider) => decider,
            Err(e) => {
                // the program was moved into the failed spawn, nothing to hand back
                self.state = SessionState::Aborted;
                return SessionOutcome {
                    result: AgentResult::aborted(&self.identity, format!("{e:#}"), None),
                    state: self.state,
                    scratch: None,
                };
            }
        };

        let result = match self.run_loop(&mut decider, &mut budget) {
            Ok(result) => result,
            Err(e) => {
                warn!("session ended on error: {e}");
                self.state = SessionState::Aborted;
                AgentResult::aborted(&self.identity, e.to_string(), None)
            }
        };
        info!(
            score = result.score,
            won = result.won,
            aborted = result.aborted,
            remaining_budget = ?budget.remaining(),
            "session over"
        );

        SessionOutcome {
            result,
            state: self.state,
            scratch: decider.finish(),
        }
    }

    fn run_loop(
        &mut self,
        decider: &mut Decider,
        budget: &mut DecisionBudget,
    ) -> Result<AgentResult, SessionError> {
        loop {
            self.state = SessionState::AwaitingMessage;
            match self.receive()? {
                EngineMessage::AskCommand(snapshot) => {
                    self.state = SessionState::DecisionRequested;
                    let command = decider.decide(snapshot, budget);
                    trace!(?command, remaining = ?budget.remaining());
                    self.send_command(&encode_command(&command))?;
                    self.state = SessionState::CommandSent;
                }
                EngineMessage::GameFinished(scores) => {
                    let entry = own_score(&scores, self.identity.team.id())?;
                    self.state = SessionState::Finished;
                    return Ok(AgentResult::finished(&self.identity, entry.score, entry.won));
                }
                EngineMessage::Abort { error, blame } => {
                    warn!("engine aborted the match: {error} (blame: {blame})");
                    self.state = SessionState::Aborted;
                    return Ok(AgentResult::aborted(&self.identity, error, Some(blame)));
                }
            }
        }
    }
}

fn own_score(scores: &[ScoreEntry], team: u8) -> Result<&ScoreEntry, ProtocolError> {
    scores
        .iter()
        .find(|entry| entry.team == team)
        .ok_or(ProtocolError::MissingTeamScore(team))
}

/// Connects then plays. A failed connection is reported as an aborted result, and the untouched
/// scratch data is handed back.
pub fn run_session(
    address: IpAddr,
    port: u16,
    identity: AgentIdentity,
    program: AgentProgram,
    budget: DecisionBudget,
) -> SessionOutcome {
    match AgentSession::connect(address, port, identity.clone()) {
        Ok(session) => session.play(program, budget),
        Err(e) => {
            warn!(agent = %identity.username, "{e}");
            SessionOutcome {
                result: AgentResult::aborted(&identity, e.to_string(), None),
                state: SessionState::Disconnected,
                scratch: Some(program.scratch),
            }
        }
    }
}
