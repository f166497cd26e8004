//! JSON-file backed store

use super::events::{ChangeSubscription, ContextId, StorageBus, StorageEvent};
use super::KeyValueStore;
use fbai_core::{storage_error, FbaiResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// A flat `{ key: value }` JSON object on disk
///
/// Every access re-reads the file so that other processes' writes are seen.
/// Writes go to a sibling temp file that is renamed over the original.
#[derive(Debug, Clone)]
pub struct FileStore {
    name: String,
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `session.json` writes through `session.json.tmp`, so stores sharing a
    /// stem never share a temp file
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Current contents of the file; a missing or empty file is an empty map
    pub fn snapshot(&self) -> FbaiResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            storage_error!(
                format!("Failed to read {}: {}", self.path.display(), e),
                &self.name,
                e
            )
        })?;

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            storage_error!(
                format!("Store file {} is not a JSON object: {}", self.path.display(), e),
                &self.name,
                e
            )
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> FbaiResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(entries)?;
        let temp_path = self.temp_path();
        std::fs::write(&temp_path, content).map_err(|e| {
            storage_error!(
                format!("Failed to write {}: {}", temp_path.display(), e),
                &self.name,
                e
            )
        })?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            storage_error!(
                format!("Failed to replace {}: {}", self.path.display(), e),
                &self.name,
                e
            )
        })?;
        Ok(())
    }

    fn update<F>(&self, mutate: F) -> FbaiResult<()>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.snapshot()?;
        mutate(&mut entries);
        self.persist(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> FbaiResult<Option<String>> {
        Ok(self.snapshot()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> FbaiResult<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> FbaiResult<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|entries| {
            entries.remove(key);
        })
    }

    fn keys(&self) -> FbaiResult<Vec<String>> {
        Ok(self.snapshot()?.into_keys().collect())
    }
}

/// Poll `store` and publish changes to `keys` made by other processes
///
/// Events carry a fresh [`ContextId`], so every in-process listener treats
/// them as external.
pub fn spawn_file_watcher(
    store: FileStore,
    bus: StorageBus,
    keys: Vec<String>,
    interval: Duration,
) -> ChangeSubscription {
    let origin = ContextId::new();
    let mut last_seen = store.snapshot().unwrap_or_default();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let current = match store.snapshot() {
                Ok(current) => current,
                Err(e) => {
                    warn!(store = %store.name, error = %e, "File watcher could not read store");
                    continue;
                }
            };

            for key in &keys {
                let before = last_seen.get(key);
                let after = current.get(key);
                if before != after {
                    debug!(key = %key, path = %store.path.display(), "Detected external store change");
                    bus.publish(StorageEvent {
                        key: key.clone(),
                        origin,
                        new_value: after.cloned(),
                    });
                }
            }

            last_seen = current;
        }
    });

    ChangeSubscription::from_handle(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new("primary", dir.path().join("session.json"));

        assert_eq!(store.get("token").unwrap(), None);
        assert!(store.keys().unwrap().is_empty());
        store.remove("token").unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_set_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new("primary", dir.path().join("nested").join("session.json"));

        store.set("token", "abcdefghijkl").unwrap();
        store.set("user", r#"{"id":"u1"}"#).unwrap();
        assert_eq!(store.get("token").unwrap(), Some("abcdefghijkl".to_string()));

        // A second handle on the same path sees the same data
        let reopened = FileStore::new("reopened", store.path());
        assert_eq!(reopened.get("user").unwrap(), Some(r#"{"id":"u1"}"#.to_string()));

        store.remove("token").unwrap();
        assert_eq!(reopened.get("token").unwrap(), None);
        assert!(!dir.path().join("nested").join("session.json.tmp").exists());
    }

    #[test]
    fn test_stores_sharing_a_stem_use_separate_temp_files() {
        let dir = TempDir::new().unwrap();
        let primary = FileStore::new("primary", dir.path().join("session.json"));
        let backup = FileStore::new("backup", dir.path().join("session.bak"));

        assert_ne!(primary.temp_path(), backup.temp_path());
        assert_eq!(primary.temp_path(), dir.path().join("session.json.tmp"));

        primary.set("token", "primary-token-1").unwrap();
        backup.set("token", "backup-token-01").unwrap();

        assert_eq!(primary.get("token").unwrap(), Some("primary-token-1".to_string()));
        assert_eq!(backup.get("token").unwrap(), Some("backup-token-01".to_string()));
        assert!(!primary.temp_path().exists());
        assert!(!backup.temp_path().exists());
    }

    #[test]
    fn test_garbage_file_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileStore::new("primary", &path);
        assert!(store.get("token").is_err());
    }

    #[tokio::test]
    async fn test_watcher_publishes_external_writes() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new("primary", dir.path().join("session.json"));
        let bus = StorageBus::default();
        let mut events = bus.subscribe();

        let _watcher = spawn_file_watcher(
            store.clone(),
            bus.clone(),
            vec!["token".to_string()],
            Duration::from_millis(20),
        );

        let other_process = FileStore::new("other", store.path());
        other_process.set("token", "from-elsewhere").unwrap();
        other_process.set("unwatched", "x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "token");
        assert_eq!(event.new_value, Some("from-elsewhere".to_string()));
    }
}
