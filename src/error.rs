//! Errors ending an agent session.

use thiserror::Error;

/// Why a session ended before the engine said it was over.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Could not reach the engine, or the handshake could not be sent.
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),

    /// The engine sent something the session cannot make sense of.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Malformed or unexpected engine traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON
    #[error("message is not valid JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),

    /// No string `header` field
    #[error("message has no 'header' field")]
    MissingHeader,

    /// Header is not one of the known message kinds
    #[error("unknown header '{0}'")]
    UnknownHeader(String),

    /// Known header, but a required field is missing or malformed
    #[error("invalid '{header}' payload: {source}")]
    InvalidPayload {
        /// Header of the message
        header: &'static str,
        /// What serde could not read
        #[source]
        source: serde_json::Error,
    },

    /// `GAME_FINISHED` did not mention our team
    #[error("no score entry for team {0}")]
    MissingTeamScore(u8),

    /// End of stream before a terminal message
    #[error("connection closed by engine")]
    ConnectionClosed,

    /// Read or write failure
    #[error("I/O error while talking to the engine: {0}")]
    Io(#[from] std::io::Error),
}
