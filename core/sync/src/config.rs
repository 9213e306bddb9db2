//! Offline engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hyperoffline_common::{Error, Result};
use hyperoffline_storage::{LocalStore, SqliteStore};

/// File name of the default database inside the data directory.
pub const DATABASE_FILE: &str = "offlinecache.sqlite3";

/// Configuration for the offline engine and its store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// SQLite database file. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// How long SQLite waits on a locked database before giving up.
    #[serde(with = "duration_millis")]
    pub busy_timeout: Duration,
    /// Capacity of the engine's event channel.
    pub event_capacity: usize,
    /// Replay a non-empty queue as soon as the listener starts online.
    pub replay_on_startup: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout: Duration::from_secs(5),
            event_capacity: 64,
            replay_on_startup: false,
        }
    }
}

impl OfflineConfig {
    /// Configuration for a database file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Default database location under the platform data directory.
    pub fn default_database_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("hyperoffline").join(DATABASE_FILE))
    }

    /// Set busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Enable or disable replay on startup.
    pub fn with_replay_on_startup(mut self, replay: bool) -> Self {
        self.replay_on_startup = replay;
        self
    }

    /// Open the configured store.
    pub fn open_store(&self) -> Result<Arc<dyn LocalStore>> {
        let store = match &self.database_path {
            Some(path) => SqliteStore::open(path, self.busy_timeout)?,
            None => SqliteStore::in_memory()?,
        };
        Ok(Arc::new(store))
    }

    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Save configuration as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = OfflineConfig::default();
        assert!(config.database_path.is_none());
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
        assert_eq!(config.event_capacity, 64);
        assert!(!config.replay_on_startup);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("offline.json");

        let config = OfflineConfig::at(temp.path().join("db.sqlite3"))
            .with_busy_timeout(Duration::from_millis(250))
            .with_replay_on_startup(true);
        config.save(&file).unwrap();

        let loaded = OfflineConfig::load(&file).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("offline.json");
        std::fs::write(&file, r#"{"event_capacity": 8}"#).unwrap();

        let loaded = OfflineConfig::load(&file).unwrap();
        assert_eq!(loaded.event_capacity, 8);
        assert_eq!(loaded.busy_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_open_store_in_memory() {
        let store = OfflineConfig::default().open_store().unwrap();
        assert_eq!(store.name(), "sqlite");
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }
}
