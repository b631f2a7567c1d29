use std::fmt;
use std::io;

/// Crate-wide error type. Mirrors the shape of the connection-layer error
/// enum this crate's I/O primitives are descended from: one flat enum,
/// manual `Display`, a blanket `From<io::Error>`.
#[derive(Debug)]
pub enum AgentError {
    Io(io::Error),
    ProtocolViolation(String),
    HandshakeRejected(String),
    DuplicateToken,
    UnknownToken,
    PayloadTooLarge,
    InvalidFrameFormat,
    TunnelDialFailed(String),
    ExtensionHostSpawnFailed(String),
    Config(String),
    Other(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::ProtocolViolation(reason) => write!(f, "protocol violation: {reason}"),
            Self::HandshakeRejected(reason) => write!(f, "handshake rejected: {reason}"),
            Self::DuplicateToken => write!(f, "Duplicate reconnection token."),
            Self::UnknownToken => write!(f, "Unknown reconnection token."),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::InvalidFrameFormat => write!(f, "invalid frame format"),
            Self::TunnelDialFailed(reason) => write!(f, "tunnel dial failed: {reason}"),
            Self::ExtensionHostSpawnFailed(reason) => write!(f, "extension host spawn failed: {reason}"),
            Self::Config(reason) => write!(f, "configuration error: {reason}"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<io::Error> for AgentError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<tokio::time::error::Elapsed> for AgentError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        Self::Other("operation timed out".into())
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
