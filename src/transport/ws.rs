use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    net::TcpStream,
    sync::{Mutex as AsyncMutex, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::{Session, Transport};
use crate::{
    agent::{
        error::TransportError,
        messages::AgentMessage,
        types::{Address, Credential},
    },
    helpers,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<WsStream, Message>;
type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>>>;

pub const DEFAULT_AGENT_PATH: &str = "/agent";

fn io_error(err: impl std::fmt::Display) -> TransportError { TransportError::Io(err.to_string()) }

fn encode(message: &AgentMessage) -> Result<Message, TransportError> {
    serde_json::to_string(message).map(Message::Text).map_err(|err| TransportError::Protocol(err.to_string()))
}

/// JSON-over-WebSocket transport speaking [`AgentMessage`] frames.
#[derive(Debug, Clone)]
pub struct WsTransport {
    path: String,
}

impl WsTransport {
    pub fn new() -> Self { Self::with_path(DEFAULT_AGENT_PATH) }

    pub fn with_path(path: impl Into<String>) -> Self { Self { path: path.into() } }

    fn url(&self, address: &Address) -> String { format!("ws://{address}{}", self.path) }
}

impl Default for WsTransport {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, address: &Address, credential: &Credential) -> Result<Arc<dyn Session>, TransportError> {
        let url = self.url(address);
        log::debug!("[ws] connecting to {url}");

        let (stream, _) = connect_async(url.as_str()).await.map_err(io_error)?;
        let (mut write, mut read) = stream.split();

        write.send(encode(&AgentMessage::Auth { key: credential.expose().to_string() })?).await.map_err(io_error)?;

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<AgentMessage>(&text) {
                    Ok(AgentMessage::AuthResult { success: true, .. }) => break,
                    Ok(AgentMessage::AuthResult { success: false, message }) => return Err(TransportError::Rejected(message)),
                    Ok(AgentMessage::Ping) => write.send(encode(&AgentMessage::Pong)?).await.map_err(io_error)?,
                    Ok(other) => return Err(TransportError::Protocol(format!("unexpected frame before auth: {other:?}"))),
                    Err(err) => return Err(TransportError::Protocol(err.to_string())),
                },
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(io_error(err)),
            }
        }

        log::info!("[ws] session established with {address}");
        Ok(Arc::new(WsSession::start(write, read)))
    }
}

pub struct WsSession {
    sink: Arc<AsyncMutex<Sink>>,
    waiters: Waiters,
    next_id: AtomicU64,
    closed: Arc<watch::Sender<bool>>,
    reader: JoinHandle<()>,
}

/// Forgets a waiter whose `send` future was dropped before the response arrived.
struct WaiterGuard<'a> {
    waiters: &'a Waiters,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) { helpers::lock(self.waiters).remove(&self.id); }
}

impl WsSession {
    fn start(sink: Sink, stream: SplitStream<WsStream>) -> Self {
        let sink = Arc::new(AsyncMutex::new(sink));
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(watch::Sender::new(false));

        let reader = tokio::spawn(read_loop(stream, Arc::clone(&sink), Arc::clone(&waiters), Arc::clone(&closed)));

        Self {
            sink,
            waiters,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    sink: Arc<AsyncMutex<Sink>>,
    waiters: Waiters,
    closed: Arc<watch::Sender<bool>>,
) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<AgentMessage>(&text) {
                Ok(AgentMessage::Response { id, success, data, message }) => {
                    let waiter = helpers::lock(&waiters).remove(&id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(if success { Ok(data) } else { Err(TransportError::Remote(message)) });
                        }
                        None => log::debug!("[ws] dropping response for unknown request {id}"),
                    }
                }
                Ok(AgentMessage::Ping) => {
                    if let Ok(pong) = encode(&AgentMessage::Pong) {
                        if let Err(err) = sink.lock().await.send(pong).await {
                            log::warn!("[ws] failed to answer ping: {err}");
                        }
                    }
                }
                Ok(AgentMessage::Pong) => {}
                Ok(other) => log::warn!("[ws] unexpected frame: {other:?}"),
                Err(err) => log::error!("[ws] failed to parse frame: {err}"),
            },
            Ok(Message::Close(_)) => {
                log::info!("[ws] agent closed the connection");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("[ws] read error: {err}");
                break;
            }
        }
    }

    closed.send_replace(true);
    for (_, tx) in helpers::lock(&waiters).drain() {
        let _ = tx.send(Err(TransportError::Closed));
    }
}

#[async_trait]
impl Session for WsSession {
    async fn send(&self, command: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        helpers::lock(&self.waiters).insert(id, tx);
        let _guard = WaiterGuard { waiters: &self.waiters, id };

        // checked after registering so a concurrent reader shutdown cannot strand the waiter
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }

        let frame = encode(&AgentMessage::Request {
            id,
            command: command.to_string(),
            params,
        })?;
        self.sink.lock().await.send(frame).await.map_err(io_error)?;

        rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn close(&self) {
        if self.closed.send_replace(true) && self.reader.is_finished() {
            return;
        }

        self.reader.abort();
        if let Err(err) = self.sink.lock().await.close().await {
            log::debug!("[ws] close handshake failed: {err}");
        }
        for (_, tx) in helpers::lock(&self.waiters).drain() {
            let _ = tx.send(Err(TransportError::Closed));
        }
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Drop for WsSession {
    fn drop(&mut self) { self.reader.abort(); }
}
