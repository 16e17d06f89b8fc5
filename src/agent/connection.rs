use chrono::{DateTime, Utc};
use std::{
    future::Future,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{sync::watch, time::timeout};

use super::{
    error::Error,
    types::{AgentConfig, AgentId, AgentSnapshot, Availability, ConfigPatch},
};
use crate::{
    helpers,
    transport::{Session, Transport},
};

/// Runs `task` on the current Tokio runtime without waiting for it. Dropped if no runtime is active.
pub(crate) fn detach<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => drop(handle.spawn(task)),
        Err(_) => log::warn!("[agent] no async runtime available, background task dropped"),
    }
}

fn close_in_background(session: Arc<dyn Session>) { detach(async move { session.close().await }); }

struct Installed {
    serial: u64,
    session: Arc<dyn Session>,
}

/// One registered remote agent and the session it owns.
///
/// Availability is `Available` exactly while a session is installed. Every
/// transition happens with the session slot locked; `epoch` moves whenever
/// the address or credential change (or the entry closes), which lets a
/// connect that raced an edit discard its result.
pub struct AgentConnection {
    id: AgentId,
    seq: u64,
    registered_at: DateTime<Utc>,
    config: RwLock<AgentConfig>,
    availability: watch::Sender<Availability>,
    session: Mutex<Option<Installed>>,
    epoch: AtomicU64,
    serial: AtomicU64,
    connecting: AtomicBool,
    closed: AtomicBool,
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
}

impl AgentConnection {
    pub fn new(id: AgentId, seq: u64, config: AgentConfig, transport: Arc<dyn Transport>, connect_timeout: Duration) -> Self {
        let (availability, _) = watch::channel(Availability::Unknown);

        Self {
            id,
            seq,
            registered_at: Utc::now(),
            config: RwLock::new(config),
            availability,
            session: Mutex::new(None),
            epoch: AtomicU64::new(0),
            serial: AtomicU64::new(0),
            connecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            transport,
            connect_timeout,
        }
    }

    pub fn id(&self) -> &AgentId { &self.id }

    /// Registration order within the owning registry.
    pub fn seq(&self) -> u64 { self.seq }

    pub fn config(&self) -> AgentConfig { helpers::read(&self.config).clone() }

    pub fn availability(&self) -> Availability { *self.availability.borrow() }

    pub fn is_available(&self) -> bool { self.availability() == Availability::Available }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    pub fn snapshot(&self) -> AgentSnapshot {
        let config = helpers::read(&self.config);

        AgentSnapshot {
            id: self.id.clone(),
            address: config.address.clone(),
            remarks: config.remarks.clone(),
            availability: self.availability(),
            registered_at: self.registered_at,
        }
    }

    /// Waits until the first connect attempt has resolved either way.
    pub async fn settled(&self) {
        let mut rx = self.availability.subscribe();
        let _ = rx.wait_for(|availability| *availability != Availability::Unknown).await;
    }

    /// Opens a fresh session and performs the handshake. Failures only show up in [`availability`](Self::availability).
    pub async fn connect(self: &Arc<Self>) {
        loop {
            if self.is_closed() {
                return;
            }
            if self.connecting.swap(true, Ordering::SeqCst) {
                log::debug!("[agent] {} connect already in progress", self.id);
                return;
            }

            let epoch = self.epoch.load(Ordering::SeqCst);
            self.attempt(epoch).await;
            self.connecting.store(false, Ordering::SeqCst);

            if self.is_closed() || self.epoch.load(Ordering::SeqCst) == epoch {
                return;
            }
            log::debug!("[agent] {} config changed while connecting, retrying", self.id);
        }
    }

    pub(crate) fn schedule_connect(self: &Arc<Self>) {
        let connection = Arc::clone(self);
        detach(async move { connection.connect().await });
    }

    async fn attempt(self: &Arc<Self>, epoch: u64) {
        let config = self.config();
        log::info!("[agent] {} connecting to {}", self.id, config.address);

        let session = match timeout(self.connect_timeout, self.transport.open(&config.address, &config.credential)).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return self.fail_attempt(epoch, &err.to_string()),
            Err(_) => return self.fail_attempt(epoch, &format!("timed out after {:?}", self.connect_timeout)),
        };

        let retired = {
            let mut slot = helpers::lock(&self.session);

            if self.is_closed() || self.epoch.load(Ordering::SeqCst) != epoch {
                Some(session)
            } else {
                let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;
                self.watch_session(serial, Arc::clone(&session));

                let previous = slot.replace(Installed { serial, session });
                self.availability.send_replace(Availability::Available);
                log::info!("[agent] {} is available at {}", self.id, config.address);
                previous.map(|installed| installed.session)
            }
        };

        if let Some(session) = retired {
            close_in_background(session);
        }
    }

    // a session that goes away on its own takes availability with it
    fn watch_session(self: &Arc<Self>, serial: u64, session: Arc<dyn Session>) {
        let connection = Arc::downgrade(self);

        detach(async move {
            session.closed().await;
            if let Some(connection) = connection.upgrade() {
                connection.mark_failed(serial, "connection lost");
            }
        });
    }

    fn fail_attempt(&self, epoch: u64, reason: &str) {
        let previous = {
            let mut slot = helpers::lock(&self.session);
            if self.is_closed() || self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            self.availability.send_replace(Availability::Unavailable);
            slot.take()
        };

        log::warn!("[agent] {} unavailable: {reason}", self.id);
        if let Some(installed) = previous {
            close_in_background(installed.session);
        }
    }

    /// Current session for a relay, tagged so a failure only retires that exact session.
    pub(crate) fn session_for_relay(&self) -> Option<(u64, Arc<dyn Session>)> {
        if self.is_closed() || !self.is_available() {
            return None;
        }
        helpers::lock(&self.session).as_ref().map(|installed| (installed.serial, Arc::clone(&installed.session)))
    }

    /// Records a failed exchange or a lost link on session `serial`.
    pub(crate) fn mark_failed(&self, serial: u64, reason: &str) {
        let failed = {
            let mut slot = helpers::lock(&self.session);
            if slot.as_ref().map(|installed| installed.serial) == Some(serial) {
                self.availability.send_replace(Availability::Unavailable);
                slot.take()
            } else {
                None
            }
        };

        if let Some(installed) = failed {
            log::warn!("[agent] {} marked unavailable: {reason}", self.id);
            close_in_background(installed.session);
        }
    }

    /// Drops the current session and moves the epoch so in-flight connects are discarded.
    fn invalidate(&self) {
        let previous = {
            let mut slot = helpers::lock(&self.session);
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.availability.send_replace(Availability::Unavailable);
            slot.take()
        };

        if let Some(installed) = previous {
            close_in_background(installed.session);
        }
    }

    /// Applies `patch` while holding the entry lock and hands the result to `persist` under the same lock.
    /// Returns whether a reconnect is required.
    pub(crate) fn edit(&self, patch: &ConfigPatch, persist: impl FnOnce(&AgentConfig)) -> Result<bool, Error> {
        let mut config = helpers::write(&self.config);
        if self.is_closed() {
            return Err(Error::NotFound(self.id.clone()));
        }

        let next = config.patched(patch);
        next.validate()?;

        let reconnect = config.needs_reconnect(&next);
        *config = next;
        if reconnect {
            self.invalidate();
        }

        persist(&config);
        Ok(reconnect)
    }

    /// Runs `persist` against the current config unless the entry has been closed.
    pub(crate) fn persist_with(&self, persist: impl FnOnce(&AgentConfig)) {
        let config = helpers::read(&self.config);
        if !self.is_closed() {
            persist(&config);
        }
    }

    /// Closes the entry for good. Returns `false` if it was already closed.
    pub(crate) fn close_with(&self, persist: impl FnOnce()) -> bool {
        let _config = helpers::write(&self.config);
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.invalidate();
        persist();
        true
    }

    /// Releases the session. Idempotent, and safe on an entry that never connected.
    pub fn close(&self) { self.close_with(|| {}); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, Script};

    fn connection(transport: &Arc<FakeTransport>, host: &str) -> Arc<AgentConnection> {
        Arc::new(AgentConnection::new(
            AgentId::generate(),
            1,
            AgentConfig::new(host, 8080, "k1"),
            Arc::clone(transport) as Arc<dyn Transport>,
            Duration::from_millis(100),
        ))
    }

    #[tokio::test]
    async fn test_connect_success_and_failure() {
        let transport = FakeTransport::new();
        transport.script("down", Script::Refuse);

        let up = connection(&transport, "up");
        let down = connection(&transport, "down");
        assert_eq!(up.availability(), Availability::Unknown);

        up.connect().await;
        down.connect().await;

        assert!(up.is_available());
        assert_eq!(down.availability(), Availability::Unavailable);
    }

    #[tokio::test]
    async fn test_wrong_credential_is_unavailable() {
        let transport = FakeTransport::new();
        transport.script("guarded", Script::RequireKey(String::from("other")));

        let agent = connection(&transport, "guarded");
        agent.connect().await;

        assert_eq!(agent.availability(), Availability::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_unavailable() {
        let transport = FakeTransport::new();
        transport.script("slow", Script::HangOnOpen);

        let agent = connection(&transport, "slow");
        agent.connect().await;

        assert_eq!(agent.availability(), Availability::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_are_not_duplicated() {
        let transport = FakeTransport::new();
        transport.script("slowish", Script::DelayOpen(Duration::from_millis(50)));

        let agent = connection(&transport, "slowish");
        tokio::join!(agent.connect(), agent.connect(), agent.connect());

        assert_eq!(transport.opens(), 1);
        assert!(agent.is_available());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let transport = FakeTransport::new();
        let never = connection(&transport, "up");
        never.close();
        never.close();
        never.connect().await;
        assert_eq!(transport.opens(), 0);

        let agent = connection(&transport, "up");
        agent.connect().await;
        agent.close();

        assert!(agent.is_closed());
        assert!(!agent.is_available());
        assert!(agent.session_for_relay().is_none());
    }

    #[tokio::test]
    async fn test_edit_after_close_is_not_found() {
        let transport = FakeTransport::new();
        let agent = connection(&transport, "up");
        agent.close();

        let patch = ConfigPatch { remarks: Some(String::from("x")), ..Default::default() };
        assert!(matches!(agent.edit(&patch, |_| {}), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stale_failure_does_not_retire_new_session() {
        let transport = FakeTransport::new();
        let agent = connection(&transport, "up");

        agent.connect().await;
        let (old, _) = agent.session_for_relay().unwrap();
        agent.connect().await;

        agent.mark_failed(old, "late failure");
        assert!(agent.is_available());
    }

    #[tokio::test]
    async fn test_dropped_session_marks_unavailable() {
        let transport = FakeTransport::new();
        let agent = connection(&transport, "up");
        agent.connect().await;
        assert!(agent.is_available());

        transport.hang_up("up");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(agent.availability(), Availability::Unavailable);
        assert!(agent.session_for_relay().is_none());
    }

    #[tokio::test]
    async fn test_retired_session_closing_keeps_replacement() {
        let transport = FakeTransport::new();
        let agent = connection(&transport, "up");

        agent.connect().await;
        agent.connect().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(transport.opens(), 2);
        assert!(agent.is_available());
    }

    #[tokio::test]
    async fn test_settled_resolves_after_first_attempt() {
        let transport = FakeTransport::new();
        transport.script("down", Script::Refuse);

        let agent = connection(&transport, "down");
        agent.schedule_connect();
        agent.settled().await;

        assert_eq!(agent.availability(), Availability::Unavailable);
    }
}
