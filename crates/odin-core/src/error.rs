//! Engine error type.

use std::fmt;

use thiserror::Error;

use crate::pit::PitError;
use crate::protocol::PacketError;
use crate::transport::TransportError;

/// Coarse classification of every [`OdinError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Open, configure, claim or transfer failure.
    Transport,
    /// A transport call exceeded its deadline.
    Timeout,
    /// The device answered, but not with what the protocol requires.
    ProtocolMismatch,
    /// The PIT could not be decoded.
    Format,
    /// The caller asked for something that cannot be done.
    Precondition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::ProtocolMismatch => write!(f, "protocol mismatch"),
            ErrorKind::Format => write!(f, "format"),
            ErrorKind::Precondition => write!(f, "precondition"),
        }
    }
}

#[derive(Error, Debug)]
pub enum OdinError {
    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Handshake mismatch: expected \"LOKE\", received {received:?}")]
    HandshakeMismatch { received: String },

    #[error("Malformed {packet} response: {source}")]
    Packet {
        packet: &'static str,
        #[source]
        source: PacketError,
    },

    #[error("Unexpected {operation} result: expected {expected}, received {received}")]
    UnexpectedResult {
        operation: &'static str,
        expected: u32,
        received: u32,
    },

    #[error("Expected file part index {expected}, received {received}")]
    PartIndexMismatch { expected: u32, received: u32 },

    #[error("Invalid PIT: {0}")]
    Format(#[from] PitError),

    #[error("Device PIT has no flashable partition named {0:?}")]
    PartitionNotFound(String),

    #[error("Modem transfers require a non-zero file identifier")]
    MissingModemIdentifier,

    #[error("File of {size} bytes exceeds the protocol's 32-bit size fields")]
    FileTooLarge { size: u64 },

    #[error("No bulk endpoint pair has been resolved; call initialize first")]
    NotInitialized,

    #[error("Invalid {name}: must be non-zero")]
    InvalidArgument { name: &'static str },
}

impl OdinError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OdinError::Transport(_) => ErrorKind::Transport,
            OdinError::Timeout { .. } => ErrorKind::Timeout,
            OdinError::HandshakeMismatch { .. }
            | OdinError::Packet { .. }
            | OdinError::UnexpectedResult { .. }
            | OdinError::PartIndexMismatch { .. } => ErrorKind::ProtocolMismatch,
            OdinError::Format(_) => ErrorKind::Format,
            OdinError::PartitionNotFound(_)
            | OdinError::MissingModemIdentifier
            | OdinError::FileTooLarge { .. }
            | OdinError::NotInitialized
            | OdinError::InvalidArgument { .. } => ErrorKind::Precondition,
        }
    }

    /// The device went away during the call.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, OdinError::Transport(TransportError::Disconnected))
    }

    /// Response-type mismatches keep both tags so they can be reported.
    pub fn response_types(&self) -> Option<(u32, u32)> {
        match self {
            OdinError::Packet {
                source: PacketError::TypeMismatch { expected, received },
                ..
            } => Some((*expected, *received)),
            _ => None,
        }
    }
}

impl From<TransportError> for OdinError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { timeout_ms } => OdinError::Timeout { timeout_ms },
            other => OdinError::Transport(other),
        }
    }
}

pub type Result<T, E = OdinError> = std::result::Result<T, E>;
