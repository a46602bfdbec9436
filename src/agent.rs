//! Who plays in a match, and how it went for them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Side of a 1v1 match. Sent to the engine as `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    /// Team `0`, first agent of a scheduled match
    Blue,
    /// Team `1`, second agent of a scheduled match
    Red,
}

impl Team {
    /// Wire id of the team
    pub fn id(self) -> u8 {
        match self {
            Team::Blue => 0,
            Team::Red => 1,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Who an agent is for the whole match. Usernames must differ between the two sides.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentIdentity {
    /// Unique within a match
    pub username: String,
    /// Side played
    pub team: Team,
}

impl AgentIdentity {
    /// Creates an identity
    pub fn new(username: impl Into<String>, team: Team) -> Self {
        Self {
            username: username.into(),
            team,
        }
    }
}

/// Outcome of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResult {
    /// Who played
    pub username: String,
    /// Side played
    pub team: Team,
    /// Final score in seconds, `0` when aborted
    pub score: f32,
    /// Declared winner by the engine
    pub won: bool,
    /// Session ended by `ABORT` or by an error
    pub aborted: bool,
    /// Why the session was aborted
    pub error: Option<String>,
    /// Who the engine held responsible for an abort
    pub blame: Option<String>,
}

impl AgentResult {
    pub(crate) fn finished(identity: &AgentIdentity, score: f32, won: bool) -> Self {
        Self {
            username: identity.username.clone(),
            team: identity.team,
            score,
            won,
            aborted: false,
            error: None,
            blame: None,
        }
    }

    pub(crate) fn aborted(
        identity: &AgentIdentity,
        error: impl Into<String>,
        blame: Option<String>,
    ) -> Self {
        Self {
            username: identity.username.clone(),
            team: identity.team,
            score: 0.0,
            won: false,
            aborted: true,
            error: Some(error.into()),
            blame,
        }
    }
}
