use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use zonelight_common::{RuntimeConfig, ZoneContext};

/// JSON files under the data directory: `config.json` for settings and
/// `state.json` for the zone context.
#[derive(Clone)]
pub struct StateStore {
    config_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ZONELIGHT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.zonelight"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            config_path: Arc::new(data_dir.join("config.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        read_json(&self.config_path).await
    }

    pub async fn save_config(&self, config: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.config_path, config).await
    }

    pub async fn load_context(&self) -> anyhow::Result<ZoneContext> {
        let _guard = self.lock.lock().await;
        read_json(&self.state_path).await
    }

    pub async fn save_context(&self, context: &ZoneContext) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.state_path, context).await
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<T>(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    // Write beside the target and rename so a crash never leaves half a file.
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, payload).await?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
