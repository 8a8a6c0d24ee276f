//! Broker and daemon errors.

use imbus_types::{ContextId, ErrorName};
use thiserror::Error;

/// Failure of a single bus request, returned to the caller as an error reply.
///
/// None of these affect any other connection's state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("name {0} is already owned")]
    NameConflict(String),

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("name {0} has no owner")]
    NoSuchName(String),

    #[error("no input context {0}")]
    NoSuchContext(ContextId),

    #[error("no factory at {0}")]
    NoSuchFactory(String),

    #[error("{0} is already registered")]
    AlreadyRegistered(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("peer {0} disconnected before replying")]
    PeerLost(String),

    #[error("{0}")]
    Failed(String),
}

impl BusError {
    /// Wire name carried by the error reply.
    pub fn name(&self) -> ErrorName {
        match self {
            Self::NameConflict(_) => ErrorName::NameConflict,
            Self::InvalidName(_) => ErrorName::InvalidName,
            Self::NoSuchName(_) => ErrorName::NoSuchName,
            Self::NoSuchContext(_) => ErrorName::NoSuchContext,
            Self::NoSuchFactory(_) => ErrorName::NoSuchFactory,
            Self::AlreadyRegistered(_) => ErrorName::AlreadyRegistered,
            Self::ProtocolViolation(_) => ErrorName::ProtocolViolation,
            Self::PeerLost(_) => ErrorName::PeerLost,
            Self::Failed(_) => ErrorName::Failed,
        }
    }
}

/// Daemon runtime and setup errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("already running")]
    AlreadyRunning,

    #[error("protocol error: {0}")]
    Protocol(#[from] imbus_protocol::ProtocolError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_variants() {
        assert_eq!(
            BusError::NoSuchContext(ContextId(4)).name(),
            ErrorName::NoSuchContext
        );
        assert_eq!(
            BusError::PeerLost(":1.2".into()).name(),
            ErrorName::PeerLost
        );
        assert_eq!(
            BusError::NoSuchContext(ContextId(4)).to_string(),
            "no input context 4"
        );
    }
}
