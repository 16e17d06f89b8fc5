use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames exchanged between the master and an agent over the WebSocket transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// First frame sent by the master after the socket opens
    Auth {
        key: String,
    },
    /// Agent verdict on the presented key
    AuthResult {
        success: bool,
        #[serde(default)]
        message: String,
    },
    /// Command issued by the master
    Request {
        id: u64,
        command: String,
        #[serde(default)]
        params: Value,
    },
    /// Agent reply, correlated by `id`
    Response {
        id: u64,
        success: bool,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        message: String,
    },
    Ping,
    Pong,
}
