use futures_util::future::join_all;
use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

use super::{
    connection::AgentConnection,
    error::RelayError,
    relay::relay,
    types::{AgentId, AgentSnapshot},
};

/// How a broadcast treats agents whose relay failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// One entry per agent, failures included as markers.
    #[default]
    CollectAll,
    /// Failed agents are left out.
    CollectSuccesses,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastEntry {
    pub id: AgentId,
    #[serde(serialize_with = "serialize_outcome")]
    pub result: Result<Value, RelayError>,
}

fn serialize_outcome<S: Serializer>(result: &Result<Value, RelayError>, serializer: S) -> Result<S::Ok, S::Error> {
    let mut state = serializer.serialize_struct("Outcome", 2)?;
    match result {
        Ok(data) => {
            state.serialize_field("ok", &true)?;
            state.serialize_field("data", data)?;
        }
        Err(err) => {
            state.serialize_field("ok", &false)?;
            state.serialize_field("error", err)?;
        }
    }
    state.end()
}

/// A snapshot joined with the payload its agent returned, an empty list when the relay failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewRow {
    #[serde(flatten)]
    pub snapshot: AgentSnapshot,
    pub payload: Value,
}

/// Relays `command` to every connection at once and collects each outcome against its identity.
///
/// Never fails as a whole: an unreachable agent costs at most one relay
/// timeout and shows up as an `Err` entry (or not at all under
/// [`Policy::CollectSuccesses`]).
pub async fn broadcast(
    connections: &[Arc<AgentConnection>],
    command: &str,
    params: Value,
    policy: Policy,
    limit: Duration,
) -> Vec<BroadcastEntry> {
    let relays = connections.iter().map(|connection| {
        let params = params.clone();
        async move {
            BroadcastEntry {
                id: connection.id().clone(),
                result: relay(connection, command, params, limit).await,
            }
        }
    });

    let entries = join_all(relays).await;
    let failed = entries.iter().filter(|entry| entry.result.is_err()).count();
    log::debug!("[fanout] {command} reached {} of {} agents", entries.len() - failed, entries.len());

    match policy {
        Policy::CollectAll => entries,
        Policy::CollectSuccesses => entries.into_iter().filter(|entry| entry.result.is_ok()).collect(),
    }
}

/// Collect-all broadcast where each row also carries the agent's snapshot taken after its relay settled.
pub async fn overview(connections: &[Arc<AgentConnection>], command: &str, params: Value, limit: Duration) -> Vec<OverviewRow> {
    let relays = connections.iter().map(|connection| {
        let params = params.clone();
        async move {
            let payload = relay(connection, command, params, limit).await.unwrap_or_else(|_| Value::Array(Vec::new()));
            OverviewRow {
                snapshot: connection.snapshot(),
                payload,
            }
        }
    });

    join_all(relays).await
}
