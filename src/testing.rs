//! Scriptable in-memory transport used by the unit tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::watch;

use crate::{
    agent::{
        error::TransportError,
        types::{Address, Credential},
    },
    helpers,
    transport::{Session, Transport},
};

/// Behaviour of every agent reachable at a given host. Hosts without a script echo requests back.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    Refuse,
    RequireKey(String),
    HangOnOpen,
    DelayOpen(Duration),
    HangOnSend,
    DelaySend(Duration),
    RemoteError,
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<HashMap<String, Script>>,
    broken: Mutex<HashSet<String>>,
    sessions: Mutex<Vec<(String, Arc<watch::Sender<bool>>)>>,
    opens: AtomicUsize,
    sends: AtomicUsize,
}

impl Shared {
    fn script(&self, host: &str) -> Option<Script> {
        helpers::lock(&self.scripts).get(host).cloned()
    }
}

pub(crate) struct FakeTransport {
    shared: Arc<Shared>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> { Arc::new(Self { shared: Arc::new(Shared::default()) }) }

    pub(crate) fn script(&self, host: &str, script: Script) {
        helpers::lock(&self.shared.scripts).insert(host.to_string(), script);
    }

    /// Makes every open session to `host` fail with a reset on its next send.
    pub(crate) fn break_host(&self, host: &str) { helpers::lock(&self.shared.broken).insert(host.to_string()); }

    /// Drops every open session to `host` from the agent side.
    pub(crate) fn hang_up(&self, host: &str) {
        for (_, closed) in helpers::lock(&self.shared.sessions).iter().filter(|(session_host, _)| session_host == host) {
            closed.send_replace(true);
        }
    }

    pub(crate) fn opens(&self) -> usize { self.shared.opens.load(Ordering::SeqCst) }

    pub(crate) fn sends(&self) -> usize { self.shared.sends.load(Ordering::SeqCst) }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, address: &Address, credential: &Credential) -> Result<Arc<dyn Session>, TransportError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);

        match self.shared.script(&address.host) {
            Some(Script::Refuse) => return Err(TransportError::Io(String::from("connection refused"))),
            Some(Script::RequireKey(key)) if key != credential.expose() => {
                return Err(TransportError::Rejected(String::from("bad key")));
            }
            Some(Script::HangOnOpen) => std::future::pending::<()>().await,
            Some(Script::DelayOpen(delay)) => tokio::time::sleep(delay).await,
            _ => {}
        }

        let closed = Arc::new(watch::Sender::new(false));
        helpers::lock(&self.shared.sessions).push((address.host.clone(), Arc::clone(&closed)));

        Ok(Arc::new(FakeSession {
            host: address.host.clone(),
            port: address.port,
            closed,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct FakeSession {
    host: String,
    port: u16,
    closed: Arc<watch::Sender<bool>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Session for FakeSession {
    async fn send(&self, command: &str, params: Value) -> Result<Value, TransportError> {
        self.shared.sends.fetch_add(1, Ordering::SeqCst);

        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        if helpers::lock(&self.shared.broken).contains(&self.host) {
            return Err(TransportError::Io(String::from("connection reset")));
        }

        match self.shared.script(&self.host) {
            Some(Script::HangOnSend) => std::future::pending::<()>().await,
            Some(Script::DelaySend(delay)) => tokio::time::sleep(delay).await,
            Some(Script::RemoteError) => return Err(TransportError::Remote(String::from("unknown command"))),
            _ => {}
        }

        Ok(json!({"host": self.host, "port": self.port, "command": command, "params": params}))
    }

    async fn close(&self) { self.closed.send_replace(true); }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
