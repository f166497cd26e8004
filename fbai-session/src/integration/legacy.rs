use crate::manager::SessionManager;
use crate::navigation::Navigation;
use fbai_core::{Feature, UserProjection};

/// The older session API, forwarded to the manager
///
/// Kept for callers written against the previous surface. Permission names
/// are plain strings here; unknown names are never granted.
#[derive(Debug, Clone)]
pub struct LegacySession {
    manager: SessionManager,
}

impl LegacySession {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    pub async fn validate_session(&self) -> bool {
        let attempts = self.manager.settings().max_validation_attempts;
        self.manager.validate(attempts).await
    }

    pub async fn clear_session(&self) {
        self.manager.clear_session().await;
    }

    pub fn get_current_user(&self) -> Option<UserProjection> {
        self.manager.current_user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.manager.is_authenticated()
    }

    pub fn get_token(&self) -> Option<String> {
        self.manager.token()
    }

    pub async fn logout(&self) -> Navigation {
        self.manager.logout().await
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        permission
            .parse::<Feature>()
            .map(|feature| self.manager.has_permission(&feature))
            .unwrap_or(false)
    }
}
