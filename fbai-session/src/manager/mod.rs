//! Session manager
//!
//! Owns the in-memory copy of the session triple (user, access token,
//! refresh token), keeps it consistent with [`MirroredStorage`] and talks
//! to the remote [`AuthApi`]. Every multi-step mutation runs under the
//! [`SessionLock`].
//!
//! The manager is a cheap handle: clones share the same state. Background
//! work (heartbeat, cross-context listener) holds only weak references and
//! stops on [`SessionManager::dispose`].

mod background;
mod preserve;
mod validation;

use crate::api::AuthApi;
use crate::lock::SessionLock;
use crate::navigation::Navigation;
use crate::storage::{ChangeSubscription, MirroredStorage};
use crate::validator::{Corruption, SessionValidator};
use fbai_core::{
    log_operation_error, log_operation_start, log_operation_success, performance, with_timeout,
    Credentials, FbaiConfig, FbaiResult, Feature, RetryConfig, SessionState, UserProjection,
    REFRESH_TOKEN_KEY, SESSION_KEYS, TOKEN_KEY, USER_KEY,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tuning knobs for one manager instance
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_validation_attempts: usize,
    pub min_token_length: usize,
    pub retry: RetryConfig,
    pub request_timeout_ms: u64,
    pub heartbeat_interval: Duration,
    pub login_route: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&FbaiConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &FbaiConfig) -> Self {
        Self {
            max_validation_attempts: config.session.max_validation_attempts,
            min_token_length: config.session.min_token_length,
            retry: config.session.retry_config(),
            request_timeout_ms: config.api.request_timeout_ms,
            heartbeat_interval: Duration::from_secs(config.session.heartbeat_interval_secs),
            login_route: config.routes.login.clone(),
        }
    }
}

/// Why the session was wiped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearReason {
    Corruption(Corruption),
    /// The server rejected the token and no refresh rescued it
    Unauthorized,
    /// Validation ran out of attempts with nothing cached to fall back on
    ValidationExhausted,
    StorageFailure,
    Logout,
    /// Requested through the public API
    Requested,
}

/// Notifications for UI layers and other observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { user_id: String },
    TokenRefreshed,
    /// The in-memory copy was re-read from storage
    Reloaded { authenticated: bool },
    /// A preserved operation lost the session and it was put back
    Restored,
    Cleared { reason: ClearReason },
}

struct ManagerInner {
    storage: MirroredStorage,
    api: Arc<dyn AuthApi>,
    settings: SessionSettings,
    validator: SessionValidator,
    lock: SessionLock,
    state: RwLock<SessionState>,
    validating: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    sync_listener: Mutex<Option<ChangeSubscription>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .heartbeat
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Marks a validation as in flight for as long as it lives
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("storage", &self.inner.storage)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl SessionManager {
    /// Build a manager and load whatever the stores hold
    ///
    /// Background tasks are not started until [`init`](Self::init).
    pub fn new(storage: MirroredStorage, api: Arc<dyn AuthApi>, settings: SessionSettings) -> Self {
        let (events, _) = broadcast::channel(64);
        let manager = Self {
            inner: Arc::new(ManagerInner {
                storage,
                api,
                validator: SessionValidator::new(settings.min_token_length),
                settings,
                lock: SessionLock::new(),
                state: RwLock::new(SessionState::default()),
                validating: AtomicBool::new(false),
                events,
                heartbeat: Mutex::new(None),
                sync_listener: Mutex::new(None),
            }),
        };
        manager.load_from_storage();
        manager
    }

    /// Start the heartbeat and the cross-context listener
    ///
    /// Must be called from within a Tokio runtime. Calling it again restarts
    /// both tasks.
    pub fn init(&self) {
        self.start_sync_listener();
        self.start_heartbeat();
        debug!(context = %self.inner.storage.context(), "Session manager initialized");
    }

    /// Stop all background work. The session itself is left untouched.
    pub fn dispose(&self) {
        self.stop_heartbeat();
        if let Some(mut listener) = self
            .inner
            .sync_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.cancel();
        }
        debug!("Session manager disposed");
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn storage(&self) -> &MirroredStorage {
        &self.inner.storage
    }

    pub fn lock(&self) -> &SessionLock {
        &self.inner.lock
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of the in-memory session triple
    pub fn snapshot(&self) -> SessionState {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .has_access_token()
    }

    pub fn token(&self) -> Option<String> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .clone()
    }

    /// Parsed cached user; `None` without an access token
    pub fn current_user(&self) -> Option<UserProjection> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .user_projection()
    }

    pub fn has_permission(&self, feature: &Feature) -> bool {
        self.current_user()
            .map(|user| user.subscription_tier.allows(feature))
            .unwrap_or(false)
    }

    /// Replace the in-memory triple with what the stores hold
    ///
    /// A structurally invalid triple is wiped from memory and both stores.
    /// Returns whether an access token is now present.
    pub fn load_from_storage(&self) -> bool {
        let loaded = match self.read_stored_state() {
            Ok(loaded) => loaded,
            Err(e) => {
                e.log();
                self.clear_everywhere(ClearReason::StorageFailure);
                return false;
            }
        };

        if let Some(corruption) = self.inner.validator.diagnose(&loaded) {
            warn!(%corruption, "Cached session failed validation, clearing");
            self.clear_everywhere(ClearReason::Corruption(corruption));
            return false;
        }

        let authenticated = loaded.has_access_token();
        self.replace_state(loaded);
        debug!(authenticated, "Session loaded from storage");
        self.emit(SessionEvent::Reloaded { authenticated });
        authenticated
    }

    /// Authenticate with credentials and persist the new session
    ///
    /// Any previous session is replaced. If the new session cannot be
    /// stored, nothing of it is kept and the storage error is returned.
    pub async fn login(&self, credentials: &Credentials) -> FbaiResult<UserProjection> {
        let guard = self.inner.lock.acquire("login").await;
        log_operation_start!("login", email = %credentials.email);

        let outcome = match self.remote("login", self.inner.api.login(credentials)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log_operation_error!("login", e, email = %credentials.email);
                return Err(e);
            }
        };

        let persisted = self
            .inner
            .storage
            .clear(&SESSION_KEYS)
            .and_then(|_| self.persist_tokens(&outcome.access_token, outcome.refresh_token.as_deref()))
            .and_then(|_| self.persist_user(&outcome.user));

        if let Err(e) = persisted {
            e.log();
            self.clear_everywhere(ClearReason::StorageFailure);
            return Err(e);
        }

        drop(guard);
        log_operation_success!("login", user_id = %outcome.user.id, tier = %outcome.user.subscription_tier);
        self.emit(SessionEvent::Authenticated {
            user_id: outcome.user.id.clone(),
        });
        self.start_heartbeat();
        Ok(outcome.user)
    }

    /// End the session locally and, best effort, on the server
    ///
    /// Never fails; repeated calls are harmless.
    pub async fn logout(&self) -> Navigation {
        let guard = self.inner.lock.acquire("logout").await;

        if let Some(token) = self.token() {
            if let Err(e) = self.remote("logout", self.inner.api.logout(&token)).await {
                warn!(error = %e, "Remote logout failed, clearing local session anyway");
            }
        }

        self.clear_everywhere(ClearReason::Logout);
        self.stop_heartbeat();
        drop(guard);

        info!("Logged out");
        Navigation::Login(self.inner.settings.login_route.clone())
    }

    /// Wipe the session from memory and both stores
    pub async fn clear_session(&self) {
        let _guard = self.inner.lock.acquire("clear_session").await;
        self.clear_everywhere(ClearReason::Requested);
    }

    // Internal helpers. Callers of the mutating ones hold the lock.

    async fn remote<T, F>(&self, operation: &str, call: F) -> FbaiResult<T>
    where
        F: Future<Output = FbaiResult<T>>,
    {
        let bounded = with_timeout(call, self.inner.settings.request_timeout_ms, operation);
        performance::measure_async(operation, bounded).await?
    }

    fn read_stored_state(&self) -> FbaiResult<SessionState> {
        let storage = &self.inner.storage;
        Ok(SessionState {
            user: storage.read(USER_KEY)?,
            access_token: storage.read(TOKEN_KEY)?,
            refresh_token: storage.read(REFRESH_TOKEN_KEY)?,
        })
    }

    fn replace_state(&self, state: SessionState) {
        *self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn update_state(&self, update: impl FnOnce(&mut SessionState)) {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut state);
    }

    fn has_refresh_token(&self) -> bool {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh_token
            .is_some()
    }

    fn persist_user(&self, user: &UserProjection) -> FbaiResult<()> {
        let blob = serde_json::to_string(user)?;
        self.inner.storage.write(USER_KEY, &blob)?;
        self.update_state(|state| state.user = Some(blob));
        Ok(())
    }

    /// Store a new access token; `None` keeps the current refresh token
    fn persist_tokens(&self, access_token: &str, refresh_token: Option<&str>) -> FbaiResult<()> {
        self.inner.storage.write(TOKEN_KEY, access_token)?;
        self.update_state(|state| state.access_token = Some(access_token.to_string()));

        if let Some(refresh_token) = refresh_token {
            self.inner.storage.write(REFRESH_TOKEN_KEY, refresh_token)?;
            self.update_state(|state| state.refresh_token = Some(refresh_token.to_string()));
        }
        Ok(())
    }

    fn clear_everywhere(&self, reason: ClearReason) {
        self.replace_state(SessionState::default());
        if let Err(e) = self.inner.storage.clear(&SESSION_KEYS) {
            warn!(error = %e, "Failed to clear session from storage");
        }
        debug!(?reason, "Session cleared");
        self.emit(SessionEvent::Cleared { reason });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{LoginOutcome, Reply, ScriptedAuthApi};
    use crate::storage::{KeyValueStore, MemoryStore};
    use fbai_core::SubscriptionTier;

    fn build(api: Arc<ScriptedAuthApi>) -> (MemoryStore, MemoryStore, SessionManager) {
        let primary = MemoryStore::new("primary");
        let backup = MemoryStore::new("backup");
        let storage = MirroredStorage::new(Arc::new(primary.clone()), Arc::new(backup.clone()));
        let manager = SessionManager::new(storage, api, SessionSettings::default());
        (primary, backup, manager)
    }

    fn outcome(tier: SubscriptionTier) -> LoginOutcome {
        LoginOutcome {
            user: UserProjection::new("u1").with_name("Ada").with_tier(tier),
            access_token: "access-token-0001".to_string(),
            refresh_token: Some("refresh-token-0001".to_string()),
        }
    }

    #[tokio::test]
    async fn test_login_persists_to_both_stores() {
        let api = Arc::new(ScriptedAuthApi::new());
        api.push_login(Reply::Ok(outcome(SubscriptionTier::Premium)));
        let (primary, backup, manager) = build(api);

        let user = manager
            .login(&Credentials::new("ada@example.com", "secret"))
            .await
            .unwrap();

        assert_eq!(user.id, "u1");
        assert!(manager.is_authenticated());
        assert!(manager.has_permission(&Feature::AiDashboard));
        for store in [&primary, &backup] {
            assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("access-token-0001"));
            assert!(store.get(USER_KEY).unwrap().is_some());
        }
        manager.dispose();
    }

    #[tokio::test]
    async fn test_login_failure_leaves_session_empty() {
        let api = Arc::new(ScriptedAuthApi::new());
        api.push_login(Reply::Unauthorized);
        let (_primary, _backup, manager) = build(api);

        let err = manager
            .login(&Credentials::new("ada@example.com", "wrong"))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_storage_failure_keeps_nothing() {
        let api = Arc::new(ScriptedAuthApi::new());
        api.push_login(Reply::Ok(outcome(SubscriptionTier::Free)));
        let primary = MemoryStore::new("primary").with_quota(64);
        let storage = MirroredStorage::new(Arc::new(primary.clone()), Arc::new(MemoryStore::new("backup")));
        let manager = SessionManager::new(storage, api, SessionSettings::default());

        assert!(manager
            .login(&Credentials::new("ada@example.com", "secret"))
            .await
            .is_err());
        assert!(!manager.is_authenticated());
        assert_eq!(primary.get(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_storage_is_cleared_on_load() {
        let api = Arc::new(ScriptedAuthApi::new());
        let primary = MemoryStore::new("primary");
        let backup = MemoryStore::new("backup");
        primary.set(USER_KEY, "{broken").unwrap();
        primary.set(TOKEN_KEY, "access-token-0001").unwrap();

        let storage = MirroredStorage::new(Arc::new(primary.clone()), Arc::new(backup));
        let manager = SessionManager::new(storage, api, SessionSettings::default());

        assert!(!manager.is_authenticated());
        assert!(primary.get(USER_KEY).unwrap().is_none());
        assert!(primary.get(TOKEN_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_free_user_lacks_premium_features() {
        let api = Arc::new(ScriptedAuthApi::new());
        api.push_login(Reply::Ok(outcome(SubscriptionTier::Free)));
        let (_primary, _backup, manager) = build(api);

        assert!(!manager.has_permission(&Feature::Analytics));
        manager
            .login(&Credentials::new("ada@example.com", "secret"))
            .await
            .unwrap();
        assert!(manager.has_permission(&Feature::Analytics));
        assert!(!manager.has_permission(&Feature::AutoResponses));
        manager.dispose();
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let api = Arc::new(ScriptedAuthApi::new());
        api.push_login(Reply::Ok(outcome(SubscriptionTier::Free)));
        let (primary, _backup, manager) = build(Arc::clone(&api));
        manager
            .login(&Credentials::new("ada@example.com", "secret"))
            .await
            .unwrap();

        let first = manager.logout().await;
        let second = manager.logout().await;

        assert_eq!(first, Navigation::Login("/login".to_string()));
        assert_eq!(first, second);
        assert!(!manager.is_authenticated());
        assert!(primary.is_empty());
        // Only the first logout had a token to announce
        assert_eq!(api.logout_calls(), 1);
    }
}
