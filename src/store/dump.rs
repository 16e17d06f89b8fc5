use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
};

use super::Store;
use crate::agent::types::{AgentConfig, AgentId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Dump {
    #[serde(default)]
    services: BTreeMap<AgentId, AgentConfig>,
}

enum Change {
    Put(AgentId, AgentConfig),
    Delete(AgentId),
    Flush(oneshot::Sender<()>),
}

/// Keeps registered services in a RON dump file.
///
/// Changes are queued to a single writer task in the order they were
/// reported, so callers never wait on the disk.
#[derive(Debug)]
pub struct DumpStore {
    path: PathBuf,
    loaded: BTreeMap<AgentId, AgentConfig>,
    changes: mpsc::UnboundedSender<Change>,
}

impl DumpStore {
    /// Opens the dump at `path`, creating it when missing and replacing it when unreadable.
    /// Must be called inside a Tokio runtime, which hosts the writer task.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let runtime = Handle::try_current().context("the dump writer needs a running Tokio runtime")?;
        let loaded = read(&path)?;

        let (changes, queue) = mpsc::unbounded_channel();
        runtime.spawn(writer(path.clone(), loaded.clone(), queue));

        Ok(Self { path, loaded, changes })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn queue(&self, change: Change) {
        if self.changes.send(change).is_err() {
            log::error!("[store] dump writer for {} has stopped", self.path.display());
        }
    }
}

async fn writer(path: PathBuf, mut services: BTreeMap<AgentId, AgentConfig>, mut queue: mpsc::UnboundedReceiver<Change>) {
    while let Some(change) = queue.recv().await {
        let mut pending = vec![change];
        while let Ok(next) = queue.try_recv() {
            pending.push(next);
        }

        let mut flushed = Vec::new();
        let mut dirty = false;
        for change in pending {
            match change {
                Change::Put(id, config) => dirty |= services.insert(id, config.clone()).as_ref() != Some(&config),
                Change::Delete(id) => dirty |= services.remove(&id).is_some(),
                Change::Flush(done) => flushed.push(done),
            }
        }

        if dirty {
            let dump = Dump { services: services.clone() };
            let target = path.clone();

            match tokio::task::spawn_blocking(move || write(&target, &dump)).await {
                Ok(Ok(())) => log::debug!("[store] wrote {} services to {}", services.len(), path.display()),
                Ok(Err(err)) => log::error!("[store] failed to persist {}: {err:#}", path.display()),
                Err(err) => log::error!("[store] dump writer task failed: {err}"),
            }
        }

        for done in flushed {
            let _ = done.send(());
        }
    }
}

fn read(path: &Path) -> anyhow::Result<BTreeMap<AgentId, AgentConfig>> {
    if !path.is_file() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("cannot create {}", parent.display()))?;
        }
        write(path, &Dump::default())?;
        log::info!("[store] created dump file {}", path.display());
        return Ok(BTreeMap::new());
    }

    let contents = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    match ron::from_str::<Dump>(&contents) {
        Ok(dump) => Ok(dump.services),
        Err(err) => {
            log::warn!("[store] corrupted dump file detected: {err}");

            let backup = PathBuf::from(format!("{}.corrupted.{}", path.display(), Utc::now().format("%Y%m%d_%H%M%S")));
            let backup_result = fs::rename(path, &backup)
                .or_else(|_| fs::copy(path, &backup).and_then(|_| fs::remove_file(path)));

            match backup_result {
                Ok(()) => log::info!("[store] backed up corrupted file to {}", backup.display()),
                Err(err) => log::warn!("[store] failed to back up corrupted file: {err}"),
            }

            write(path, &Dump::default())?;
            Ok(BTreeMap::new())
        }
    }
}

fn write(path: &Path, dump: &Dump) -> anyhow::Result<()> {
    let encoded = ron::ser::to_string_pretty(dump, PrettyConfig::default()).context("cannot encode dump")?;
    let staging = path.with_extension("ron.tmp");

    fs::write(&staging, encoded).with_context(|| format!("cannot write {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| format!("cannot replace {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl Store for DumpStore {
    // the dump as it was when opened; restore runs once at startup
    fn load_all(&self) -> anyhow::Result<Vec<(AgentId, AgentConfig)>> {
        Ok(self.loaded.iter().map(|(id, config)| (id.clone(), config.clone())).collect())
    }

    fn on_change(&self, id: &AgentId, config: Option<&AgentConfig>) {
        match config {
            Some(config) => self.queue(Change::Put(id.clone(), config.clone())),
            None => self.queue(Change::Delete(id.clone())),
        }
    }

    async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.queue(Change::Flush(done));
        let _ = wait.await;
    }
}
