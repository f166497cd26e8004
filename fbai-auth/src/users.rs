//! In-memory account store with argon2 password hashes

use crate::jwt::AuthError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use fbai_core::{Role, SubscriptionTier, UserProjection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Monthly post allowance for free accounts
pub const FREE_POST_ALLOWANCE: u32 = 10;

const MIN_PASSWORD_LENGTH: usize = 6;

/// Registration request
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Login request
#[derive(Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Refresh request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Stored account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub tier: SubscriptionTier,
    pub posts_remaining: u32,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserData {
    fn new(request: RegisterRequest) -> Result<Self, AuthError> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            email: normalize_email(&request.email),
            username: request.username.filter(|u| !u.trim().is_empty()),
            name: request.name.filter(|n| !n.trim().is_empty()),
            password_hash: hash_password(&request.password)?,
            role: Role::User,
            tier: SubscriptionTier::Free,
            posts_remaining: FREE_POST_ALLOWANCE,
            created_at: Utc::now(),
            last_login: None,
        })
    }

    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(password, &self.password_hash).unwrap_or(false)
    }

    /// The client-facing view; premium accounts have no post limit
    pub fn to_projection(&self) -> UserProjection {
        let mut projection = UserProjection::new(&self.id).with_tier(self.tier);
        if let Some(username) = &self.username {
            projection = projection.with_username(username);
        }
        if let Some(name) = &self.name {
            projection = projection.with_name(name);
        }
        if !self.tier.is_premium() {
            projection = projection.with_posts_remaining(self.posts_remaining);
        }
        projection
    }
}

/// Thread-safe account storage keyed by id
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: Arc<RwLock<HashMap<String, UserData>>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<UserData, AuthError> {
        validate_registration(&request)?;
        let email = normalize_email(&request.email);

        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == email) {
            return Err(AuthError::EmailTaken);
        }

        let user = UserData::new(request)?;
        users.insert(user.id.clone(), user.clone());
        info!(user_id = %user.id, "Registered account");

        Ok(user)
    }

    pub async fn authenticate(&self, request: &LoginRequest) -> Result<UserData, AuthError> {
        if request.email.trim().is_empty() || request.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let email = normalize_email(&request.email);

        let mut users = self.users.write().await;
        let user = users
            .values_mut()
            .find(|u| u.email == email)
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.verify_password(&request.password) {
            return Err(AuthError::InvalidCredentials);
        }

        user.last_login = Some(Utc::now());
        Ok(user.clone())
    }

    pub async fn get_by_id(&self, user_id: &str) -> Option<UserData> {
        self.users.read().await.get(user_id).cloned()
    }

    pub async fn get_by_email(&self, email: &str) -> Option<UserData> {
        let email = normalize_email(email);
        self.users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    /// Change an account's tier; takes effect on the next issued token
    pub async fn set_tier(&self, user_id: &str, tier: SubscriptionTier) -> Result<(), AuthError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or(AuthError::UnknownUser)?;
        user.tier = tier;
        if !tier.is_premium() {
            user.posts_remaining = user.posts_remaining.min(FREE_POST_ALLOWANCE);
        }
        info!(user_id, tier = %tier, "Subscription tier changed");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(request: &RegisterRequest) -> Result<(), AuthError> {
    let email = request.email.trim();
    if email.is_empty() || request.password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    if !email.contains('@') {
        return Err(AuthError::InvalidRegistration(
            "email address is malformed".to_string(),
        ));
    }
    if request.password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::InvalidRegistration(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::TokenCreation)
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            username: Some("poster".to_string()),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_register_starts_on_free_tier() {
        let store = UserStore::new();
        let user = store
            .register(register_request("Alice@Example.com", "hunter22"))
            .await
            .unwrap();

        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.tier, SubscriptionTier::Free);
        assert_eq!(user.posts_remaining, FREE_POST_ALLOWANCE);
        assert_ne!(user.password_hash, "hunter22");

        let projection = user.to_projection();
        assert_eq!(projection.posts_remaining, Some(FREE_POST_ALLOWANCE));
        assert_eq!(projection.username.as_deref(), Some("poster"));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = UserStore::new();
        store
            .register(register_request("a@example.com", "hunter22"))
            .await
            .unwrap();

        let err = store
            .register(register_request(" A@example.com ", "other-pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let store = UserStore::new();

        assert!(matches!(
            store.register(register_request("", "hunter22")).await,
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            store.register(register_request("not-an-email", "hunter22")).await,
            Err(AuthError::InvalidRegistration(_))
        ));
        assert!(matches!(
            store.register(register_request("a@example.com", "123")).await,
            Err(AuthError::InvalidRegistration(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_authenticate() {
        let store = UserStore::new();
        store
            .register(register_request("a@example.com", "hunter22"))
            .await
            .unwrap();

        let ok = LoginRequest {
            email: "A@example.com".to_string(),
            password: "hunter22".to_string(),
        };
        let user = store.authenticate(&ok).await.unwrap();
        assert!(user.last_login.is_some());

        let wrong = LoginRequest {
            email: "a@example.com".to_string(),
            password: "wrong-pass".to_string(),
        };
        assert!(matches!(
            store.authenticate(&wrong).await,
            Err(AuthError::InvalidCredentials)
        ));

        let unknown = LoginRequest {
            email: "b@example.com".to_string(),
            password: "hunter22".to_string(),
        };
        assert!(matches!(
            store.authenticate(&unknown).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_premium_projection_is_unlimited() {
        let store = UserStore::new();
        let user = store
            .register(register_request("p@example.com", "hunter22"))
            .await
            .unwrap();

        store
            .set_tier(&user.id, SubscriptionTier::Premium)
            .await
            .unwrap();
        let projection = store.get_by_id(&user.id).await.unwrap().to_projection();

        assert_eq!(projection.subscription_tier, SubscriptionTier::Premium);
        assert_eq!(projection.posts_remaining, None);

        assert!(matches!(
            store.set_tier("missing", SubscriptionTier::Premium).await,
            Err(AuthError::UnknownUser)
        ));
    }
}
