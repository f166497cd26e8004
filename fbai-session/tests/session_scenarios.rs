//! End-to-end session scenarios against in-memory stores and a scripted API

use fbai_core::{
    Credentials, SubscriptionTier, UserProjection, REFRESH_TOKEN_KEY, TOKEN_KEY, USER_KEY,
};
use fbai_session::api::{LoginOutcome, RefreshedTokens, Reply};
use fbai_session::{
    ClearReason, Corruption, FileStore, IntegrationSettings, KeyValueStore, MemoryStore,
    MirroredStorage, Navigation, Navigator, PageServices, ScriptedAuthApi, SessionEvent,
    SessionIntegration, SessionManager, SessionSettings, StorageBus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    primary: MemoryStore,
    backup: MemoryStore,
    storage: MirroredStorage,
    api: Arc<ScriptedAuthApi>,
}

impl Fixture {
    fn new() -> Self {
        let primary = MemoryStore::new("primary");
        let backup = MemoryStore::new("backup");
        let storage = MirroredStorage::new(Arc::new(primary.clone()), Arc::new(backup.clone()))
            .with_bus(StorageBus::default());
        Self {
            primary,
            backup,
            storage,
            api: Arc::new(ScriptedAuthApi::new()),
        }
    }

    fn seed(&self, user: Option<&str>, token: Option<&str>, refresh: Option<&str>) {
        for store in [&self.primary, &self.backup] {
            if let Some(user) = user {
                store.set(USER_KEY, user).unwrap();
            }
            if let Some(token) = token {
                store.set(TOKEN_KEY, token).unwrap();
            }
            if let Some(refresh) = refresh {
                store.set(REFRESH_TOKEN_KEY, refresh).unwrap();
            }
        }
    }

    fn manager(&self) -> SessionManager {
        SessionManager::new(
            self.storage.clone(),
            self.api.clone(),
            SessionSettings::default(),
        )
    }
}

#[derive(Default)]
struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, target: &str) {
        self.visits.lock().unwrap().push(target.to_string());
    }
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn implausible_token_is_discarded_on_load() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    let mut events = manager.subscribe();

    fixture.seed(
        Some(r#"{"id":"u1","subscriptionTier":"free"}"#),
        Some("short"),
        None,
    );

    assert!(!manager.load_from_storage());
    assert!(!manager.is_authenticated());
    assert!(fixture.primary.is_empty());
    assert!(fixture.backup.is_empty());
    assert!(drain(&mut events).contains(&SessionEvent::Cleared {
        reason: ClearReason::Corruption(Corruption::ImplausibleToken { length: 5 }),
    }));
}

#[tokio::test]
async fn expired_token_is_refreshed_and_retried() {
    let fixture = Fixture::new();
    fixture.seed(
        Some(r#"{"id":"u1"}"#),
        Some("expired-access-token"),
        Some("refresh-token-0001"),
    );
    fixture
        .api
        .push_profile(Reply::Unauthorized)
        .push_profile(Reply::Ok(UserProjection::new("u1").with_name("Ada")))
        .push_refresh(Reply::Ok(RefreshedTokens {
            access_token: "fresh-access-token".to_string(),
            refresh_token: None,
        }));

    let manager = fixture.manager();
    assert!(manager.validate(3).await);

    assert_eq!(fixture.api.refresh_calls(), 1);
    assert_eq!(fixture.api.profile_calls(), 2);
    assert_eq!(manager.token().as_deref(), Some("fresh-access-token"));
    for store in [&fixture.primary, &fixture.backup] {
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("fresh-access-token"));
        // Not rotated, so the old refresh token stays
        assert_eq!(
            store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(),
            Some("refresh-token-0001")
        );
    }
    assert_eq!(manager.current_user().unwrap().display_name(), "Ada");
    manager.dispose();
}

#[tokio::test]
async fn failed_refresh_clears_session() {
    let fixture = Fixture::new();
    fixture.seed(
        Some(r#"{"id":"u1"}"#),
        Some("expired-access-token"),
        Some("refresh-token-0001"),
    );
    fixture
        .api
        .push_profile(Reply::Unauthorized)
        .push_refresh(Reply::Unauthorized);

    let manager = fixture.manager();
    assert!(!manager.validate(3).await);
    assert!(!manager.is_authenticated());
    assert!(fixture.primary.is_empty());
}

#[tokio::test]
async fn unauthorized_without_refresh_token_clears_session() {
    let fixture = Fixture::new();
    fixture.seed(Some(r#"{"id":"u1"}"#), Some("expired-access-token"), None);
    fixture.api.push_profile(Reply::Unauthorized);

    let manager = fixture.manager();
    assert!(!manager.validate(3).await);
    assert_eq!(fixture.api.refresh_calls(), 0);
    assert!(!manager.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn unreachable_server_degrades_to_cached_user() {
    let fixture = Fixture::new();
    fixture.seed(Some(r#"{"id":"u1"}"#), Some("access-token-0001"), None);
    fixture
        .api
        .push_profile(Reply::NetworkDown)
        .push_profile(Reply::Status(503))
        .push_profile(Reply::Hang);

    let manager = fixture.manager();
    let started = tokio::time::Instant::now();
    assert!(manager.validate(3).await);

    assert_eq!(fixture.api.profile_calls(), 3);
    assert!(manager.is_authenticated());
    assert_eq!(
        fixture.primary.get(TOKEN_KEY).unwrap().as_deref(),
        Some("access-token-0001")
    );
    // Linear backoff: 1s after the first failure, 2s after the second
    assert!(started.elapsed() >= Duration::from_secs(3));
    manager.dispose();
}

#[tokio::test(start_paused = true)]
async fn unreachable_server_without_cached_user_fails() {
    let fixture = Fixture::new();
    fixture.seed(None, Some("access-token-0001"), None);

    let manager = fixture.manager();
    assert!(!manager.validate(3).await);
    assert_eq!(fixture.api.profile_calls(), 3);
    assert!(!manager.is_authenticated());
    assert!(fixture.primary.get(TOKEN_KEY).unwrap().is_none());
}

#[tokio::test]
async fn validate_without_token_makes_no_call() {
    let fixture = Fixture::new();
    let manager = fixture.manager();

    assert!(!manager.validate(3).await);
    assert!(fixture.api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_validation_is_rejected() {
    let fixture = Fixture::new();
    fixture.seed(Some(r#"{"id":"u1"}"#), Some("access-token-0001"), None);
    fixture.api.push_profile(Reply::Hang);

    let manager = fixture.manager();
    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.validate(1).await })
    };
    tokio::task::yield_now().await;

    assert!(!manager.validate(1).await);
    // The hung call times out and the cached user carries the session
    assert!(first.await.unwrap());
    assert_eq!(fixture.api.profile_calls(), 1);
    manager.dispose();
}

async fn landing_page_for(tier: Option<SubscriptionTier>) -> (Navigation, Vec<String>) {
    let fixture = Fixture::new();
    let mut user = UserProjection::new("u1");
    if let Some(tier) = tier {
        user = user.with_tier(tier);
    }
    fixture.api.push_login(Reply::Ok(LoginOutcome {
        user,
        access_token: "access-token-0001".to_string(),
        refresh_token: Some("refresh-token-0001".to_string()),
    }));

    let services = Arc::new(PageServices::new());
    services.register_manager(fixture.manager());
    let navigator = Arc::new(RecordingNavigator::default());
    let integration = SessionIntegration::new(
        "https://app.example.com/login",
        services,
        navigator.clone(),
        IntegrationSettings::default(),
    );
    integration.start().await;

    let navigation = integration
        .submit_login(&Credentials::new("ada@example.com", "secret"))
        .await
        .unwrap();
    integration.dispose();

    let visits = navigator.visits.lock().unwrap().clone();
    (navigation, visits)
}

#[tokio::test]
async fn login_redirects_by_subscription_tier() {
    let (premium, visits) = landing_page_for(Some(SubscriptionTier::Premium)).await;
    assert_eq!(premium, Navigation::AiDashboard("/ai-dashboard".to_string()));
    assert_eq!(visits, vec!["/ai-dashboard".to_string()]);

    let (free, _) = landing_page_for(Some(SubscriptionTier::Free)).await;
    assert_eq!(free, Navigation::Dashboard("/dashboard".to_string()));

    let (absent, _) = landing_page_for(None).await;
    assert_eq!(absent, Navigation::Dashboard("/dashboard".to_string()));
}

#[tokio::test]
async fn logout_in_one_context_clears_the_other() {
    let fixture = Fixture::new();
    fixture.seed(
        Some(r#"{"id":"u1"}"#),
        Some("access-token-0001"),
        Some("refresh-token-0001"),
    );

    let context_a = fixture.manager();
    let api_b = Arc::new(ScriptedAuthApi::new());
    let context_b = SessionManager::new(
        fixture.storage.fork_context(),
        api_b.clone(),
        SessionSettings::default(),
    );
    context_a.init();
    context_b.init();
    assert!(context_b.is_authenticated());

    let navigation = context_a.logout().await;
    assert_eq!(navigation.target(), "/login");

    tokio::time::timeout(Duration::from_secs(2), async {
        while context_b.is_authenticated() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("context B should observe the logout");

    assert!(context_b.current_user().is_none());
    assert!(api_b.calls().is_empty());

    context_a.dispose();
    context_b.dispose();
}

#[tokio::test]
async fn logout_elsewhere_during_validation_is_not_undone() {
    let fixture = Fixture::new();
    fixture.seed(
        Some(r#"{"id":"u1"}"#),
        Some("access-token-0001"),
        Some("refresh-token-0001"),
    );

    let context_a = fixture.manager();
    let api_b = Arc::new(ScriptedAuthApi::new());
    api_b.push_profile(Reply::After(
        Duration::from_millis(200),
        UserProjection::new("u1"),
    ));
    let context_b = SessionManager::new(
        fixture.storage.fork_context(),
        api_b.clone(),
        SessionSettings::default(),
    );
    context_a.init();
    context_b.init();

    let validating = {
        let context_b = context_b.clone();
        tokio::spawn(async move { context_b.validate(1).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    context_a.logout().await;

    assert!(!validating.await.unwrap());
    assert_eq!(api_b.profile_calls(), 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        while context_b.snapshot().user.is_some() || context_b.is_authenticated() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("context B should end up logged out");

    for store in [&fixture.primary, &fixture.backup] {
        assert!(store.get(USER_KEY).unwrap().is_none());
        assert!(store.get(TOKEN_KEY).unwrap().is_none());
    }

    context_a.dispose();
    context_b.dispose();
}

#[tokio::test]
async fn login_in_one_context_is_picked_up_by_the_other() {
    let fixture = Fixture::new();
    fixture.api.push_login(Reply::Ok(LoginOutcome {
        user: UserProjection::new("u7"),
        access_token: "access-token-0007".to_string(),
        refresh_token: None,
    }));

    let context_a = fixture.manager();
    let context_b = SessionManager::new(
        fixture.storage.fork_context(),
        Arc::new(ScriptedAuthApi::new()),
        SessionSettings::default(),
    );
    context_b.init();
    assert!(!context_b.is_authenticated());

    context_a
        .login(&Credentials::new("ada@example.com", "secret"))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while context_b.current_user().map(|user| user.id) != Some("u7".to_string()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("context B should observe the login");

    context_a.dispose();
    context_b.dispose();
}

#[tokio::test]
async fn mirrored_stores_survive_losing_either_one() {
    let fixture = Fixture::new();
    fixture.api.push_login(Reply::Ok(LoginOutcome {
        user: UserProjection::new("u1"),
        access_token: "access-token-0001".to_string(),
        refresh_token: Some("refresh-token-0001".to_string()),
    }));
    let manager = fixture.manager();
    manager
        .login(&Credentials::new("ada@example.com", "secret"))
        .await
        .unwrap();
    manager.dispose();

    // Primary wiped: backup restores it
    for key in [USER_KEY, TOKEN_KEY, REFRESH_TOKEN_KEY] {
        fixture.primary.remove(key).unwrap();
    }
    let reloaded = fixture.manager();
    assert!(reloaded.is_authenticated());
    assert_eq!(
        fixture.primary.get(TOKEN_KEY).unwrap().as_deref(),
        Some("access-token-0001")
    );

    // Backup wiped: primary still serves
    for key in [USER_KEY, TOKEN_KEY, REFRESH_TOKEN_KEY] {
        fixture.backup.remove(key).unwrap();
    }
    assert!(fixture.manager().is_authenticated());
}

#[tokio::test]
async fn preserved_operations_are_mutually_exclusive() {
    let fixture = Fixture::new();
    fixture.seed(Some(r#"{"id":"u1"}"#), Some("access-token-0001"), None);
    let manager = fixture.manager();

    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();

    for _ in 0..10 {
        let manager = manager.clone();
        let inside = inside.clone();
        let max_inside = max_inside.clone();
        tasks.push(tokio::spawn(async move {
            manager
                .preserve_during(|| async move {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert!(manager.lock().acquisitions() >= 10);
    assert!(!manager.lock().is_locked());
}

#[tokio::test]
async fn double_logout_is_harmless() {
    let fixture = Fixture::new();
    fixture.seed(Some(r#"{"id":"u1"}"#), Some("access-token-0001"), None);
    fixture.api.push_logout(Reply::NetworkDown);
    let manager = fixture.manager();

    // Remote failure does not stop the local logout
    let first = manager.logout().await;
    let second = manager.logout().await;

    assert_eq!(first, second);
    assert!(!manager.is_authenticated());
    assert!(fixture.primary.is_empty());
    assert_eq!(fixture.api.logout_calls(), 1);
}

#[tokio::test]
async fn file_backed_session_survives_restart() {
    let dir = TempDir::new().unwrap();
    let open = |api: Arc<ScriptedAuthApi>| {
        let storage = MirroredStorage::new(
            Arc::new(FileStore::new("primary", dir.path().join("session.json"))),
            Arc::new(FileStore::new("backup", dir.path().join("session.backup.json"))),
        );
        SessionManager::new(storage, api, SessionSettings::default())
    };

    let api = Arc::new(ScriptedAuthApi::new());
    api.push_login(Reply::Ok(LoginOutcome {
        user: UserProjection::new("u1").with_tier(SubscriptionTier::Premium),
        access_token: "access-token-0001".to_string(),
        refresh_token: None,
    }));
    let first_run = open(api);
    first_run
        .login(&Credentials::new("ada@example.com", "secret"))
        .await
        .unwrap();
    first_run.dispose();

    std::fs::remove_file(dir.path().join("session.json")).unwrap();

    let second_run = open(Arc::new(ScriptedAuthApi::new()));
    let user = second_run.current_user().unwrap();
    assert_eq!(user.subscription_tier, SubscriptionTier::Premium);
    assert!(dir.path().join("session.json").exists());
}
