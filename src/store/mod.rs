pub mod dump;

use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Mutex};

use crate::{
    agent::types::{AgentConfig, AgentId},
    helpers,
};

pub use dump::DumpStore;

/// Persistence hooks for registry entries.
///
/// `on_change` is fire-and-forget and must not block on I/O. Implementations
/// log their own failures; the registry never waits on or reacts to them.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    fn load_all(&self) -> anyhow::Result<Vec<(AgentId, AgentConfig)>>;

    /// `None` means the entry was deleted.
    fn on_change(&self, id: &AgentId, config: Option<&AgentConfig>);

    /// Waits until every change reported so far has been persisted.
    async fn flush(&self) {}
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<AgentId, AgentConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_entries(entries: impl IntoIterator<Item = (AgentId, AgentConfig)>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }

    pub fn entries(&self) -> BTreeMap<AgentId, AgentConfig> { helpers::lock(&self.entries).clone() }
}

#[async_trait]
impl Store for MemoryStore {
    fn load_all(&self) -> anyhow::Result<Vec<(AgentId, AgentConfig)>> { Ok(self.entries().into_iter().collect()) }

    fn on_change(&self, id: &AgentId, config: Option<&AgentConfig>) {
        let mut entries = helpers::lock(&self.entries);
        match config {
            Some(config) => entries.insert(id.clone(), config.clone()),
            None => entries.remove(id),
        };
    }
}
