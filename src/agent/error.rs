use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

use super::types::AgentId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("agent address is missing a host")]
    EmptyHost,
    #[error("agent port must be between 1 and 65535")]
    InvalidPort,
}

/// Failures reported by a [`Transport`](crate::transport::Transport) or one of its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(String),
    #[error("handshake rejected: {0}")]
    Rejected(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("agent reported failure: {0}")]
    Remote(String),
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether this failure says anything about the health of the link itself.
    /// An agent that answered with an error is still reachable.
    pub fn is_liveness_failure(&self) -> bool { !matches!(self, TransportError::Remote(_)) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("agent is unavailable")]
    Unavailable,
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RelayError {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Unavailable => "unavailable",
            RelayError::Timeout(_) => "timeout",
            RelayError::Transport(_) => "transport",
        }
    }
}

// Broadcast results carry failures as data, so they have to serialize.
impl Serialize for RelayError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("RelayError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("agent {0} does not exist")]
    NotFound(AgentId),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}
