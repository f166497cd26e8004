//! Keep the session alive across operations that may wipe storage

use super::{ClearReason, SessionEvent, SessionManager};
use fbai_core::{FbaiResult, SessionState, REFRESH_TOKEN_KEY, TOKEN_KEY, USER_KEY};
use std::future::Future;
use tracing::{debug, warn};

impl SessionManager {
    /// Run `operation` under the session lock and undo session loss
    ///
    /// The session is snapshotted before the operation. Afterwards, whether
    /// the operation succeeded or not, storage is re-read; if the snapshot
    /// had a token and the re-read does not, the snapshot is written back.
    /// The operation's own output is returned unchanged.
    pub async fn preserve_during<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.inner.lock.acquire("preserve_during").await;
        let snapshot = self.snapshot();

        let output = operation().await;

        self.load_from_storage();
        if snapshot.has_access_token() && !self.is_authenticated() {
            warn!("Session was lost during a preserved operation, restoring it");
            if let Err(e) = self.restore(&snapshot) {
                e.log();
                self.clear_everywhere(ClearReason::StorageFailure);
            }
        } else {
            debug!("Session intact after preserved operation");
        }

        drop(guard);
        output
    }

    fn restore(&self, snapshot: &SessionState) -> FbaiResult<()> {
        let storage = &self.inner.storage;
        let fields = [
            (TOKEN_KEY, &snapshot.access_token),
            (REFRESH_TOKEN_KEY, &snapshot.refresh_token),
            (USER_KEY, &snapshot.user),
        ];

        let absent: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| *key)
            .collect();
        if !absent.is_empty() {
            storage.clear(&absent)?;
        }

        for (key, value) in fields {
            if let Some(value) = value {
                storage.write(key, value)?;
            }
        }

        self.replace_state(snapshot.clone());
        self.emit(SessionEvent::Restored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::SessionSettings;
    use super::*;
    use crate::api::ScriptedAuthApi;
    use crate::storage::{KeyValueStore, MemoryStore, MirroredStorage};
    use fbai_core::{FbaiError, ErrorContext};
    use std::sync::Arc;

    fn logged_in() -> (MemoryStore, MemoryStore, SessionManager) {
        let primary = MemoryStore::new("primary");
        let backup = MemoryStore::new("backup");
        primary.set(TOKEN_KEY, "access-token-0001").unwrap();
        primary.set(USER_KEY, r#"{"id":"u1"}"#).unwrap();
        backup.set(TOKEN_KEY, "access-token-0001").unwrap();
        backup.set(USER_KEY, r#"{"id":"u1"}"#).unwrap();

        let storage = MirroredStorage::new(Arc::new(primary.clone()), Arc::new(backup.clone()));
        let manager = SessionManager::new(
            storage,
            Arc::new(ScriptedAuthApi::new()),
            SessionSettings::default(),
        );
        (primary, backup, manager)
    }

    #[tokio::test]
    async fn test_restores_when_operation_wipes_both_stores() {
        let (primary, backup, manager) = logged_in();
        let mut events = manager.subscribe();

        let wiped = {
            let primary = primary.clone();
            let backup = backup.clone();
            manager
                .preserve_during(|| async move {
                    for store in [&primary, &backup] {
                        store.remove(TOKEN_KEY).unwrap();
                        store.remove(USER_KEY).unwrap();
                    }
                    "switched"
                })
                .await
        };

        assert_eq!(wiped, "switched");
        assert!(manager.is_authenticated());
        assert_eq!(manager.current_user().unwrap().id, "u1");
        assert_eq!(primary.get(TOKEN_KEY).unwrap().as_deref(), Some("access-token-0001"));
        assert_eq!(backup.get(USER_KEY).unwrap().as_deref(), Some(r#"{"id":"u1"}"#));

        let mut restored = false;
        while let Ok(event) = events.try_recv() {
            restored |= event == SessionEvent::Restored;
        }
        assert!(restored);
    }

    #[tokio::test]
    async fn test_restores_on_error_path_and_propagates_error() {
        let (primary, backup, manager) = logged_in();

        let result: Result<(), FbaiError> = manager
            .preserve_during(|| async move {
                for store in [&primary, &backup] {
                    store.remove(TOKEN_KEY).unwrap();
                }
                Err(FbaiError::Internal {
                    message: "switch failed".to_string(),
                    source: None,
                    context: ErrorContext::new("test"),
                })
            })
            .await;

        assert!(result.is_err());
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_no_restore_when_session_survives() {
        let (_primary, _backup, manager) = logged_in();
        let mut events = manager.subscribe();

        manager.preserve_during(|| async {}).await;

        while let Ok(event) = events.try_recv() {
            assert_ne!(event, SessionEvent::Restored);
        }
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_no_restore_when_there_was_no_session() {
        let manager = SessionManager::new(
            MirroredStorage::new(
                Arc::new(MemoryStore::new("primary")),
                Arc::new(MemoryStore::new("backup")),
            ),
            Arc::new(ScriptedAuthApi::new()),
            SessionSettings::default(),
        );

        manager.preserve_during(|| async {}).await;
        assert!(!manager.is_authenticated());
    }
}
