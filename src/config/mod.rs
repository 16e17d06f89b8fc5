pub mod structs;

use anyhow::{Context, anyhow};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use structs::prelude::*;

use crate::agent::Settings;

/// `~/.fleet`, where the config file and the default service dump live.
pub fn base_dir() -> anyhow::Result<PathBuf> {
    home::home_dir().map(|path| path.join(".fleet")).ok_or_else(|| anyhow!("impossible to get your home directory"))
}

pub fn read() -> anyhow::Result<Config> { read_from(&base_dir()?) }

/// Reads `<base>/config.toml`, writing the defaults first when it does not exist.
pub fn read_from(base: &Path) -> anyhow::Result<Config> {
    let config_path = base.join("config.toml");

    if !config_path.is_file() {
        let config = Config::default();
        config.save_to(base)?;
        log::info!("created config file {}", config_path.display());
        return Ok(config);
    }

    let contents = fs::read_to_string(&config_path).with_context(|| format!("cannot read {}", config_path.display()))?;
    toml::from_str(&contents).with_context(|| format!("cannot parse {}", config_path.display()))
}

impl Config {
    pub fn save_to(&self, base: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(base).with_context(|| format!("cannot create {}", base.display()))?;

        let contents = toml::to_string(self).context("cannot encode config")?;
        let config_path = base.join("config.toml");
        fs::write(&config_path, contents).with_context(|| format!("error writing {}", config_path.display()))
    }

    pub fn settings(&self) -> Settings {
        Settings {
            relay_timeout: Duration::from_millis(self.relay.timeout),
            connect_timeout: Duration::from_millis(self.relay.connect_timeout),
        }
    }

    pub fn reconnect_interval(&self) -> Option<Duration> {
        match self.relay.reconnect_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn store_path(&self, base: &Path) -> PathBuf {
        let path = Path::new(&self.store.path);
        if path.is_absolute() { path.to_path_buf() } else { base.join(path) }
    }
}
