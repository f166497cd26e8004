//! Redundant session storage
//!
//! Every session key is written to two independent stores. Reads fall back
//! to the backup and repair the primary, so a single store losing its data
//! does not log the user out. Writes are announced on an optional
//! [`StorageBus`] so other contexts sharing the stores can react.

pub mod events;
pub mod file;
pub mod memory;

pub use events::{ChangeSubscription, ContextId, ExternalChange, StorageBus, StorageEvent};
pub use file::{spawn_file_watcher, FileStore};
pub use memory::MemoryStore;

use chrono::Utc;
use fbai_core::{FbaiResult, TIMESTAMP_KEY};
use std::sync::Arc;
use tracing::{debug, warn};

/// Synchronous string key-value store
pub trait KeyValueStore: Send + Sync {
    /// Label used in logs and errors
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> FbaiResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> FbaiResult<()>;

    /// Removing an absent key is not an error
    fn remove(&self, key: &str) -> FbaiResult<()>;

    /// Keys currently present, in no particular order
    fn keys(&self) -> FbaiResult<Vec<String>>;
}

/// Primary + backup store pair owned by one context
#[derive(Clone)]
pub struct MirroredStorage {
    primary: Arc<dyn KeyValueStore>,
    backup: Arc<dyn KeyValueStore>,
    context: ContextId,
    bus: Option<StorageBus>,
}

impl std::fmt::Debug for MirroredStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirroredStorage")
            .field("primary", &self.primary.name())
            .field("backup", &self.backup.name())
            .field("context", &self.context)
            .field("shared", &self.bus.is_some())
            .finish()
    }
}

impl MirroredStorage {
    pub fn new(primary: Arc<dyn KeyValueStore>, backup: Arc<dyn KeyValueStore>) -> Self {
        Self {
            primary,
            backup,
            context: ContextId::new(),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: StorageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Same stores and bus, new context identity
    pub fn fork_context(&self) -> Self {
        Self {
            primary: Arc::clone(&self.primary),
            backup: Arc::clone(&self.backup),
            context: ContextId::new(),
            bus: self.bus.clone(),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn bus(&self) -> Option<&StorageBus> {
        self.bus.as_ref()
    }

    /// Read from the primary, falling back to the backup
    ///
    /// A value found only in the backup is copied back into the primary.
    /// Fails only when neither store can be read.
    pub fn read(&self, key: &str) -> FbaiResult<Option<String>> {
        let primary_error = match self.primary.get(key) {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => None,
            Err(e) => {
                warn!(key, store = self.primary.name(), error = %e, "Primary store read failed");
                Some(e)
            }
        };

        match self.backup.get(key) {
            Ok(Some(value)) => {
                debug!(key, "Recovered value from backup store");
                if let Err(e) = self.primary.set(key, &value) {
                    warn!(key, error = %e, "Could not repair primary store from backup");
                }
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => match primary_error {
                Some(primary_error) => {
                    warn!(key, store = self.backup.name(), error = %e, "Backup store read failed");
                    Err(primary_error)
                }
                None => {
                    warn!(key, store = self.backup.name(), error = %e, "Backup store read failed, treating as absent");
                    Ok(None)
                }
            },
        }
    }

    /// Write to both stores and stamp the write time
    pub fn write(&self, key: &str, value: &str) -> FbaiResult<()> {
        let stamp = Utc::now().timestamp_millis().to_string();

        self.primary.set(key, value)?;
        self.backup.set(key, value)?;
        self.primary.set(TIMESTAMP_KEY, &stamp)?;
        self.backup.set(TIMESTAMP_KEY, &stamp)?;

        self.publish(key, Some(value.to_string()));
        Ok(())
    }

    /// Remove `keys` and the timestamp from both stores
    ///
    /// Every removal is attempted; the first failure is returned.
    pub fn clear(&self, keys: &[&str]) -> FbaiResult<()> {
        let mut first_error = None;

        for key in keys.iter().copied().chain(std::iter::once(TIMESTAMP_KEY)) {
            for store in [&self.primary, &self.backup] {
                if let Err(e) = store.remove(key) {
                    warn!(key, store = store.name(), error = %e, "Failed to remove key");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        for key in keys {
            self.publish(key, None);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Invoke `callback` when another context changes one of `keys`
    ///
    /// A listener that falls behind the bus is told with
    /// [`ExternalChange::Missed`] and should re-read everything. Must be called from within a Tokio runtime. Without a bus there is
    /// nobody to hear from and the returned subscription is inactive.
    pub fn on_external_change<F>(&self, keys: &[&str], callback: F) -> ChangeSubscription
    where
        F: Fn(ExternalChange) + Send + 'static,
    {
        let Some(bus) = &self.bus else {
            debug!("No storage bus attached, external changes will not be observed");
            return ChangeSubscription::inactive();
        };

        let own_context = self.context;
        let watched: Vec<String> = keys.iter().map(|key| key.to_string()).collect();

        ChangeSubscription::spawn(bus.subscribe(), move |change| {
            if let ExternalChange::Changed(event) = &change {
                if event.origin == own_context || !watched.contains(&event.key) {
                    return;
                }
            }
            callback(change);
        })
    }

    fn publish(&self, key: &str, new_value: Option<String>) {
        if let Some(bus) = &self.bus {
            bus.publish(StorageEvent {
                key: key.to_string(),
                origin: self.context,
                new_value,
            });
        }
    }
}
