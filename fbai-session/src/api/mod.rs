//! Remote authentication API consumed by the session manager

pub mod envelope;
pub mod http;
pub mod scripted;

pub use http::HttpAuthApi;
pub use scripted::{ApiCall, Reply, ScriptedAuthApi};

use async_trait::async_trait;
use fbai_core::{Credentials, FbaiResult, UserProjection};

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub user: UserProjection,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Result of a successful token refresh
///
/// A missing refresh token means the server did not rotate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// The four remote operations the session depends on
///
/// Implementations report HTTP 401 as [`fbai_core::FbaiError::Unauthorized`];
/// every other failure is treated as transient by the caller.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> FbaiResult<LoginOutcome>;

    async fn fetch_profile(&self, access_token: &str) -> FbaiResult<UserProjection>;

    async fn refresh(&self, refresh_token: &str) -> FbaiResult<RefreshedTokens>;

    /// Best-effort server notification
    async fn logout(&self, access_token: &str) -> FbaiResult<()>;
}
