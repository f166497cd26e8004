//! HTTP handlers
//!
//! Every success body is `{ "success": true, "data": .. }`; failures come from
//! [`AuthError`] and carry `success: false`.

use crate::extract::{AuthUser, RequirePremium};
use crate::jwt::AuthError;
use crate::users::{LoginRequest, RefreshRequest, RegisterRequest, UserData};
use crate::AuthState;
use axum::{extract::State, http::StatusCode, Json};
use fbai_core::{Feature, SubscriptionTier};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Standard response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            data: Some(data),
        })
    }
}

impl ApiResponse<Value> {
    pub fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.into()),
            data: None,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    pub subscription_tier: SubscriptionTier,
    pub features: Vec<Feature>,
}

fn session_payload(state: &AuthState, user: &UserData) -> Result<Value, AuthError> {
    let tokens = state.jwt.generate_token_pair(&user.id, user.role, user.tier)?;
    Ok(json!({
        "user": user.to_projection(),
        "accessToken": tokens.access_token,
        "refreshToken": tokens.refresh_token,
    }))
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AuthState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), AuthError> {
    let user = state.users.register(request).await?;
    let payload = session_payload(&state, &user)?;

    Ok((StatusCode::CREATED, ApiResponse::ok(payload)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<ApiResponse<Value>>, AuthError> {
    let user = state.users.authenticate(&request).await.map_err(|e| {
        warn!("Login failed: {}", e);
        e
    })?;
    info!(user_id = %user.id, tier = %user.tier, "Login succeeded");

    Ok(ApiResponse::ok(session_payload(&state, &user)?))
}

/// POST /api/auth/refresh
///
/// The new pair reflects the account's current tier, not the one baked into
/// the presented refresh token.
pub async fn refresh(
    State(state): State<AuthState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<ApiResponse<Value>>, AuthError> {
    let claims = state.jwt.verify_refresh_token(&request.refresh_token)?;
    let user = state
        .users
        .get_by_id(&claims.sub)
        .await
        .ok_or(AuthError::UnknownUser)?;

    let tokens = state.jwt.generate_token_pair(&user.id, user.role, user.tier)?;

    Ok(ApiResponse::ok(json!({
        "accessToken": tokens.access_token,
        "refreshToken": tokens.refresh_token,
    })))
}

/// GET /api/auth/profile
pub async fn profile(
    State(state): State<AuthState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<Value>>, AuthError> {
    let account = state
        .users
        .get_by_id(&user.id)
        .await
        .ok_or(AuthError::UnknownUser)?;

    Ok(ApiResponse::ok(json!({ "user": account.to_projection() })))
}

/// POST /api/auth/logout
///
/// Tokens are stateless; this only acknowledges the caller.
pub async fn logout(user: AuthUser) -> Json<ApiResponse<Value>> {
    info!(user_id = %user.id, "Logout");
    ApiResponse::<Value>::message("Logged out")
}

/// GET /api/features
pub async fn features(user: AuthUser) -> Json<ApiResponse<FeatureSet>> {
    ApiResponse::ok(FeatureSet {
        subscription_tier: user.tier,
        features: user.tier.features(),
    })
}

/// GET /api/ai/access
pub async fn ai_access(RequirePremium(user): RequirePremium) -> Json<ApiResponse<Value>> {
    let unlocked: Vec<Feature> = Feature::ALL
        .iter()
        .filter(|feature| user.can_use(feature))
        .cloned()
        .collect();

    ApiResponse::ok(json!({
        "granted": true,
        "features": unlocked,
    }))
}

/// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "fbai-auth" }))
}
