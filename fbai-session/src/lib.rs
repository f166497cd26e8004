//! FBAI Session - client-side session persistence
//!
//! Keeps a user logged in across reloads, storage loss and concurrent
//! contexts:
//!
//! - [`storage`]: primary + backup stores with cross-context change events
//! - [`validator`]: structural checks on the cached session
//! - [`lock`]: mutual exclusion for multi-step operations
//! - [`api`]: the remote auth endpoints
//! - [`manager`]: the session lifecycle
//! - [`integration`]: page wiring, legacy facade and language switching

pub mod api;
pub mod integration;
pub mod lock;
pub mod manager;
pub mod navigation;
pub mod storage;
pub mod validator;

pub use api::{AuthApi, HttpAuthApi, LoginOutcome, RefreshedTokens, ScriptedAuthApi};
pub use integration::{
    IntegrationSettings, IntegrationState, LanguageSwitcher, LegacySession, Navigator, PageKind,
    PageServices, PreservingLanguageSwitcher, SessionIntegration,
};
pub use lock::{SessionLock, SessionLockGuard};
pub use manager::{ClearReason, SessionEvent, SessionManager, SessionSettings};
pub use navigation::Navigation;
pub use storage::{
    spawn_file_watcher, ChangeSubscription, ContextId, ExternalChange, FileStore, KeyValueStore,
    MemoryStore, MirroredStorage, StorageBus, StorageEvent,
};
pub use validator::{Corruption, SessionValidator};

use fbai_core::{FbaiConfig, FbaiResult};
use std::sync::Arc;

/// Build a manager over the configured session files and HTTP API
///
/// Both files share `bus`, so a [`spawn_file_watcher`] on the primary file
/// feeds other processes' writes into the manager.
pub fn file_backed_manager(config: &FbaiConfig, bus: StorageBus) -> FbaiResult<SessionManager> {
    let primary = FileStore::new("primary", &config.storage.primary_path);
    let backup = FileStore::new("backup", &config.storage.backup_path);
    let storage = MirroredStorage::new(Arc::new(primary), Arc::new(backup)).with_bus(bus);
    let api = HttpAuthApi::new(config.api.clone())?;

    Ok(SessionManager::new(
        storage,
        Arc::new(api),
        SessionSettings::from_config(config),
    ))
}
