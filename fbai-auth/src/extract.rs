//! Request guards built on top of the bearer [`Claims`]

use crate::jwt::{AuthError, Claims};
use crate::AuthState;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fbai_core::{Feature, Role, SubscriptionTier};
use serde_json::json;
use tracing::debug;

/// Any caller holding a valid access token
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
    pub tier: SubscriptionTier,
}

impl AuthUser {
    pub fn can_use(&self, feature: &Feature) -> bool {
        self.tier.allows(feature)
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            tier: claims.subscription_tier,
        }
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Claims::from_request_parts(parts, state).await.map(Into::into)
    }
}

/// A caller whose token carries the premium tier
#[derive(Debug, Clone, PartialEq)]
pub struct RequirePremium(pub AuthUser);

/// Rejection for a free-tier caller on a premium route
#[derive(Debug)]
pub struct SubscriptionRequired;

impl IntoResponse for SubscriptionRequired {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": "subscription_required",
            "message": "A premium subscription is required for this feature",
        }));

        (StatusCode::FORBIDDEN, body).into_response()
    }
}

impl<S> FromRequestParts<S> for RequirePremium
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        if !user.tier.is_premium() {
            debug!(user_id = %user.id, "Premium route refused");
            return Err(SubscriptionRequired.into_response());
        }

        Ok(RequirePremium(user))
    }
}
