pub mod ws;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::agent::{
    error::TransportError,
    types::{Address, Credential},
};

pub use ws::WsTransport;

/// Opens authenticated sessions to agents.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connects to `address` and completes the credential handshake.
    async fn open(&self, address: &Address, credential: &Credential) -> Result<Arc<dyn Session>, TransportError>;
}

/// A live, authenticated exchange channel owned by one agent connection.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Sends `command` and waits for the correlated response. Callers bound this with their own timeout.
    async fn send(&self, command: &str, params: Value) -> Result<Value, TransportError>;

    async fn close(&self);

    /// Resolves once the session is gone, whether the agent dropped it or [`close`](Self::close) ran.
    async fn closed(&self);
}
