use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;

use super::{connection::AgentConnection, error::RelayError};

pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends one command to one agent and waits, at most `limit`, for the correlated response.
///
/// A connection that is not `Available` fails with [`RelayError::Unavailable`]
/// without touching the transport. A timeout or a link-level transport error
/// retires the session and leaves the connection `Unavailable`. The payload is
/// returned as the agent sent it.
pub async fn relay(connection: &AgentConnection, command: &str, params: Value, limit: Duration) -> Result<Value, RelayError> {
    debug_assert!(!command.is_empty(), "relay command must not be empty");

    let Some((serial, session)) = connection.session_for_relay() else {
        log::debug!("[relay] {} is not available, skipping {command}", connection.id());
        return Err(RelayError::Unavailable);
    };

    match timeout(limit, session.send(command, params)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(err)) => {
            if err.is_liveness_failure() {
                connection.mark_failed(serial, &err.to_string());
            } else {
                log::debug!("[relay] {} rejected {command}: {err}", connection.id());
            }
            Err(RelayError::Transport(err))
        }
        Err(_) => {
            connection.mark_failed(serial, &format!("{command} timed out after {limit:?}"));
            Err(RelayError::Timeout(limit))
        }
    }
}
