use futures_util::future::join_all;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::task::JoinHandle;

use super::{
    connection::AgentConnection,
    error::{Error, ValidationError},
    fanout::{self, BroadcastEntry, OverviewRow, Policy},
    relay::{self, DEFAULT_RELAY_TIMEOUT},
    types::{AgentConfig, AgentId, AgentSnapshot, Availability, ConfigPatch},
};
use crate::{helpers, store::Store, transport::Transport};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeouts applied to every connection the registry owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub relay_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Authoritative map of remote agents, keyed by identity.
///
/// The map lock is only held to insert, remove or look up an entry; config
/// edits and removal of one identity serialize on that entry's own lock.
/// Operations that open sessions are scheduled on the current Tokio runtime
/// and never awaited by the caller.
pub struct Registry {
    agents: RwLock<HashMap<AgentId, Arc<AgentConnection>>>,
    issued: Mutex<HashSet<AgentId>>,
    seq: AtomicU64,
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    settings: Settings,
}

impl Registry {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn Store>, settings: Settings) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            issued: Mutex::new(HashSet::new()),
            seq: AtomicU64::new(0),
            transport,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn len(&self) -> usize { helpers::read(&self.agents).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    // identities are never handed out twice in one process, even after removal
    fn claim_identity(&self) -> AgentId {
        let mut issued = helpers::lock(&self.issued);
        loop {
            let id = AgentId::generate();
            if issued.insert(id.clone()) {
                return id;
            }
        }
    }

    fn insert(&self, id: AgentId, config: AgentConfig) -> Arc<AgentConnection> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(AgentConnection::new(
            id.clone(),
            seq,
            config,
            Arc::clone(&self.transport),
            self.settings.connect_timeout,
        ));

        helpers::write(&self.agents).insert(id, Arc::clone(&connection));
        connection
    }

    /// Adds a new agent and schedules its first connect. Returns before any network I/O.
    pub fn register(&self, config: AgentConfig) -> Result<AgentId, ValidationError> {
        config.validate()?;

        let id = self.claim_identity();
        let connection = self.insert(id.clone(), config);
        connection.persist_with(|config| self.store.on_change(&id, Some(config)));

        log::info!("[registry] registered {id} at {}", connection.config().address);
        connection.schedule_connect();
        Ok(id)
    }

    /// Loads every stored entry under its stored identity and schedules connects. Returns how many were restored.
    pub fn restore(&self) -> anyhow::Result<usize> {
        let mut restored = 0;

        for (id, config) in self.store.load_all()? {
            if let Err(err) = config.validate() {
                log::warn!("[registry] skipping stored agent {id}: {err}");
                continue;
            }
            if !helpers::lock(&self.issued).insert(id.clone()) {
                log::warn!("[registry] skipping duplicate stored agent {id}");
                continue;
            }

            self.insert(id, config).schedule_connect();
            restored += 1;
        }

        log::info!("[registry] restored {restored} agents");
        Ok(restored)
    }

    /// Live handle for `id`. Relays already holding it keep working after removal.
    pub fn connection(&self, id: &AgentId) -> Result<Arc<AgentConnection>, Error> {
        helpers::read(&self.agents).get(id).cloned().ok_or_else(|| Error::NotFound(id.clone()))
    }

    pub fn get(&self, id: &AgentId) -> Result<AgentSnapshot, Error> { Ok(self.connection(id)?.snapshot()) }

    /// Applies the present fields of `patch`. A changed address or credential drops the session and reconnects in the background.
    pub fn edit(&self, id: &AgentId, patch: &ConfigPatch) -> Result<(), Error> {
        let connection = self.connection(id)?;
        let reconnect = connection.edit(patch, |config| self.store.on_change(id, Some(config)))?;

        if reconnect {
            log::info!("[registry] {id} moved to {}, reconnecting", connection.config().address);
            connection.schedule_connect();
        }
        Ok(())
    }

    pub fn remove(&self, id: &AgentId) -> Result<(), Error> {
        let connection = helpers::write(&self.agents).remove(id).ok_or_else(|| Error::NotFound(id.clone()))?;

        if connection.close_with(|| self.store.on_change(id, None)) {
            log::info!("[registry] removed {id}");
        }
        Ok(())
    }

    /// Schedules a fresh connect for `id`, replacing its session when one is open.
    pub fn link(&self, id: &AgentId) -> Result<(), Error> {
        self.connection(id)?.schedule_connect();
        Ok(())
    }

    /// Every live entry in registration order.
    pub fn connections(&self) -> Vec<Arc<AgentConnection>> {
        let mut connections: Vec<_> = helpers::read(&self.agents).values().cloned().collect();
        connections.sort_by_key(|connection| connection.seq());
        connections
    }

    pub fn list(&self) -> Vec<AgentSnapshot> { self.connections().iter().map(|connection| connection.snapshot()).collect() }

    /// Relays to a single agent resolved by identity.
    pub async fn relay(&self, id: &AgentId, command: &str, params: Value) -> Result<Value, Error> {
        let connection = self.connection(id)?;
        Ok(relay::relay(&connection, command, params, self.settings.relay_timeout).await?)
    }

    /// Relays to every agent registered when the call starts.
    pub async fn broadcast(&self, command: &str, params: Value, policy: Policy) -> Vec<BroadcastEntry> {
        fanout::broadcast(&self.connections(), command, params, policy, self.settings.relay_timeout).await
    }

    pub async fn overview(&self, command: &str, params: Value) -> Vec<OverviewRow> {
        fanout::overview(&self.connections(), command, params, self.settings.relay_timeout).await
    }

    /// Waits up to `deadline` for every entry to leave `Unknown`. Returns whether all did.
    pub async fn settle(&self, deadline: Duration) -> bool {
        let connections = self.connections();
        let settled = join_all(connections.iter().map(|connection| connection.settled()));

        tokio::time::timeout(deadline, settled).await.is_ok()
    }

    /// Waits for the store to persist every change made so far.
    pub async fn flush(&self) { self.store.flush().await; }

    /// Periodically reconnects unavailable agents until the registry is dropped.
    pub fn spawn_reconnect(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else { break };

                for connection in registry.connections() {
                    if connection.availability() == Availability::Unavailable {
                        log::debug!("[registry] retrying {}", connection.id());
                        connection.schedule_connect();
                    }
                }
            }
        })
    }
}
