//! FBAI Auth - subscription-gated JWT authentication server
//!
//! Serves the endpoints the session client talks to (login, profile,
//! refresh, logout) plus tier-gated feature routes.

pub mod extract;
pub mod handlers;
pub mod jwt;
pub mod users;

pub use extract::{AuthUser, RequirePremium, SubscriptionRequired};
pub use jwt::{AuthError, Claims, JwtService, TokenPair, TokenType};
pub use users::{RegisterRequest, UserData, UserStore, FREE_POST_ALLOWANCE};

use axum::{
    routing::{get, post},
    Router,
};
use fbai_core::SubscriptionTier;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Password shared by the seeded demo accounts
pub const DEMO_PASSWORD: &str = "demo-password";

/// Server configuration
#[derive(Debug, Clone)]
pub struct AuthServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    /// Create a free and a premium demo account on startup
    pub seed_demo_users: bool,
}

impl Default for AuthServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            jwt_secret: random_secret(),
            issuer: "fbai-auth".to_string(),
            audience: "fbai-clients".to_string(),
            seed_demo_users: false,
        }
    }
}

impl AuthServerConfig {
    /// Load configuration from environment variables
    ///
    /// Without `FBAI_JWT_SECRET` a random secret is used, so tokens do not
    /// survive a restart.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let jwt_secret = match std::env::var("FBAI_JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("FBAI_JWT_SECRET not set, using a random per-process secret");
                defaults.jwt_secret
            }
        };

        Self {
            host: std::env::var("FBAI_HOST").unwrap_or(defaults.host),
            port: std::env::var("FBAI_PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(defaults.port),
            jwt_secret,
            issuer: std::env::var("FBAI_JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: std::env::var("FBAI_JWT_AUDIENCE").unwrap_or(defaults.audience),
            seed_demo_users: std::env::var("FBAI_DEMO_USERS")
                .ok()
                .and_then(|flag| flag.parse().ok())
                .unwrap_or(defaults.seed_demo_users),
        }
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AuthState {
    pub jwt: Arc<JwtService>,
    pub users: UserStore,
}

impl AuthState {
    pub fn new(config: &AuthServerConfig) -> Self {
        Self {
            jwt: Arc::new(JwtService::new(
                &config.jwt_secret,
                &config.issuer,
                &config.audience,
            )),
            users: UserStore::new(),
        }
    }

    /// Register `free@fbai.local` and `premium@fbai.local` with [`DEMO_PASSWORD`]
    pub async fn seed_demo_accounts(&self) -> Result<(), AuthError> {
        for (email, tier) in [
            ("free@fbai.local", SubscriptionTier::Free),
            ("premium@fbai.local", SubscriptionTier::Premium),
        ] {
            if self.users.get_by_email(email).await.is_some() {
                continue;
            }
            let user = self
                .users
                .register(RegisterRequest {
                    email: email.to_string(),
                    password: DEMO_PASSWORD.to_string(),
                    username: email.split('@').next().map(str::to_string),
                    name: None,
                })
                .await?;
            self.users.set_tier(&user.id, tier).await?;
        }
        info!("Seeded demo accounts");
        Ok(())
    }
}

/// Create the application router
pub fn create_app(state: AuthState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
        .route("/profile", get(handlers::profile))
        .route("/logout", post(handlers::logout));

    Router::new()
        .nest("/api/auth", auth_routes)
        .route("/api/features", get(handlers::features))
        .route("/api/ai/access", get(handlers::ai_access))
        .route("/api/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on an already-bound listener until it fails
pub async fn serve(listener: TcpListener, state: AuthState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("FBAI auth server listening on {}", addr);
    }
    axum::serve(listener, create_app(state)).await
}
