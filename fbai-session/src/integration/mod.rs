//! Page-level glue between the session manager and the rest of a page
//!
//! A page registers its collaborators in [`PageServices`] as they become
//! ready. [`SessionIntegration::start`] waits for the session manager,
//! wires the legacy facade and the language switcher, then runs the page
//! specific setup. If the manager never shows up, the page's legacy hooks
//! run instead.

pub mod language;
pub mod legacy;
pub mod page;

pub use language::{LanguageSwitcher, PreservingLanguageSwitcher};
pub use legacy::LegacySession;
pub use page::PageKind;

use crate::manager::SessionManager;
use crate::navigation::Navigation;
use fbai_core::{Credentials, ErrorContext, FbaiConfig, FbaiError, FbaiResult, RouteConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Sends the user somewhere else
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// Fallback behavior run when the session manager is unavailable
pub type LegacyHook = Box<dyn Fn() -> FbaiResult<()> + Send + Sync>;

/// Late-bound collaborators shared by everything on a page
///
/// Each slot can be filled once.
#[derive(Default)]
pub struct PageServices {
    manager: OnceLock<SessionManager>,
    language_switcher: OnceLock<Arc<dyn LanguageSwitcher>>,
}

impl PageServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` if a manager was already registered
    pub fn register_manager(&self, manager: SessionManager) -> bool {
        self.manager.set(manager).is_ok()
    }

    /// `false` if a switcher was already registered
    pub fn register_language_switcher(&self, switcher: Arc<dyn LanguageSwitcher>) -> bool {
        self.language_switcher.set(switcher).is_ok()
    }

    pub fn manager(&self) -> Option<SessionManager> {
        self.manager.get().cloned()
    }

    pub fn language_switcher(&self) -> Option<Arc<dyn LanguageSwitcher>> {
        self.language_switcher.get().cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationState {
    Uninitialized,
    WaitingForDependencies,
    Initialized,
    /// The manager never became available; legacy hooks were run
    Fallback,
}

#[derive(Debug, Clone)]
pub struct IntegrationSettings {
    pub poll_interval: Duration,
    pub poll_attempts: usize,
    pub health_check_interval: Duration,
    pub routes: RouteConfig,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self::from_config(&FbaiConfig::default())
    }
}

impl IntegrationSettings {
    pub fn from_config(config: &FbaiConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.session.dependency_poll_interval_ms),
            poll_attempts: config.session.dependency_poll_attempts,
            health_check_interval: Duration::from_secs(config.session.health_check_interval_secs),
            routes: config.routes.clone(),
        }
    }
}

pub struct SessionIntegration {
    services: Arc<PageServices>,
    navigator: Arc<dyn Navigator>,
    settings: IntegrationSettings,
    page: PageKind,
    state: Mutex<IntegrationState>,
    legacy_hooks: Vec<LegacyHook>,
    legacy: OnceLock<LegacySession>,
    language: OnceLock<Arc<dyn LanguageSwitcher>>,
    page_setup_done: AtomicBool,
    health_check: Mutex<Option<JoinHandle<()>>>,
}

impl SessionIntegration {
    pub fn new(
        location: &str,
        services: Arc<PageServices>,
        navigator: Arc<dyn Navigator>,
        settings: IntegrationSettings,
    ) -> Self {
        Self {
            services,
            navigator,
            settings,
            page: PageKind::classify(location),
            state: Mutex::new(IntegrationState::Uninitialized),
            legacy_hooks: Vec::new(),
            legacy: OnceLock::new(),
            language: OnceLock::new(),
            page_setup_done: AtomicBool::new(false),
            health_check: Mutex::new(None),
        }
    }

    pub fn with_legacy_hook(mut self, hook: LegacyHook) -> Self {
        self.legacy_hooks.push(hook);
        self
    }

    pub fn page(&self) -> PageKind {
        self.page
    }

    pub fn state(&self) -> IntegrationState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: IntegrationState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Wait for dependencies and wire everything up
    ///
    /// Only the first call does any work; later calls report the state.
    pub async fn start(&self) -> IntegrationState {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != IntegrationState::Uninitialized {
                return *state;
            }
            *state = IntegrationState::WaitingForDependencies;
        }

        let Some(manager) = self.wait_for_manager().await else {
            self.run_fallback();
            return IntegrationState::Fallback;
        };

        manager.init();
        let _ = self.legacy.set(LegacySession::new(manager.clone()));
        if let Some(switcher) = self.services.language_switcher() {
            let wrapped: Arc<dyn LanguageSwitcher> =
                Arc::new(PreservingLanguageSwitcher::new(switcher, manager.clone()));
            let _ = self.language.set(wrapped);
        }

        self.set_state(IntegrationState::Initialized);
        info!(page = ?self.page, "Session integration initialized");

        self.run_page_setup(&manager).await;
        self.start_health_check(manager);
        IntegrationState::Initialized
    }

    async fn wait_for_manager(&self) -> Option<SessionManager> {
        for attempt in 0..=self.settings.poll_attempts {
            if let Some(manager) = self.services.manager() {
                debug!(attempt, "Session manager available");
                return Some(manager);
            }
            if attempt < self.settings.poll_attempts {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }
        warn!(
            attempts = self.settings.poll_attempts,
            "Session manager never became available"
        );
        None
    }

    fn run_fallback(&self) {
        for (index, hook) in self.legacy_hooks.iter().enumerate() {
            if let Err(e) = hook() {
                warn!(hook = index, error = %e, "Legacy hook failed");
            }
        }
        self.set_state(IntegrationState::Fallback);
        info!(hooks = self.legacy_hooks.len(), "Running in legacy fallback mode");
    }

    async fn run_page_setup(&self, manager: &SessionManager) {
        if self.page_setup_done.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.page.requires_session() {
            let attempts = manager.settings().max_validation_attempts;
            if !manager.validate(attempts).await && !manager.is_authenticated() {
                info!("No valid session on a protected page, redirecting to login");
                self.navigator.navigate(&self.settings.routes.login);
            }
        }
    }

    fn start_health_check(&self, manager: SessionManager) {
        let period = self.settings.health_check_interval;
        let navigator = Arc::clone(&self.navigator);
        let login_route = self.settings.routes.login.clone();
        let requires_session = self.page.requires_session();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !manager.is_authenticated() {
                    continue;
                }
                if !manager.validate(1).await && !manager.is_authenticated() && requires_session {
                    info!("Session lost during health check, redirecting to login");
                    navigator.navigate(&login_route);
                }
            }
        });

        let previous = self
            .health_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn manager(&self) -> FbaiResult<SessionManager> {
        match self.state() {
            IntegrationState::Initialized => self.services.manager().ok_or_else(not_ready),
            _ => Err(not_ready()),
        }
    }

    /// Log in through the manager and send the user to their landing page
    pub async fn submit_login(&self, credentials: &Credentials) -> FbaiResult<Navigation> {
        let manager = self.manager()?;
        let user = manager.login(credentials).await?;

        let navigation = Navigation::after_login(user.subscription_tier, &self.settings.routes);
        self.navigator.navigate(navigation.target());
        Ok(navigation)
    }

    /// Handle a click on a logout link
    pub async fn handle_logout_link(&self) -> Navigation {
        let navigation = match self.manager() {
            Ok(manager) => manager.logout().await,
            Err(_) => Navigation::Login(self.settings.routes.login.clone()),
        };
        self.navigator.navigate(navigation.target());
        navigation
    }

    pub fn legacy(&self) -> Option<&LegacySession> {
        self.legacy.get()
    }

    /// The page's language switcher, wrapped to preserve the session
    pub fn language_switcher(&self) -> Option<Arc<dyn LanguageSwitcher>> {
        self.language.get().cloned()
    }

    pub fn dispose(&self) {
        if let Some(handle) = self
            .health_check
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        if let Some(manager) = self.services.manager() {
            manager.dispose();
        }
    }
}

impl Drop for SessionIntegration {
    fn drop(&mut self) {
        if let Some(handle) = self
            .health_check
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn not_ready() -> FbaiError {
    FbaiError::Internal {
        message: "Session integration is not initialized".to_string(),
        source: None,
        context: ErrorContext::new("session_integration")
            .with_suggestion("Call SessionIntegration::start first"),
    }
}
