//! JWT issuing and verification
//!
//! Tokens are HS256, bound to an issuer and an audience, and always carry the
//! subject's role and subscription tier so gated routes never need a user
//! lookup.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use fbai_core::{Role, SubscriptionTier};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::AuthState;

/// Token type enumeration
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims
///
/// `role` and `subscriptionTier` have no defaults: a token without them does
/// not deserialize and is rejected as invalid.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub role: Role,
    pub subscription_tier: SubscriptionTier,
    pub aud: String,
    pub iss: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
    pub token_type: TokenType,
}

/// Access/refresh pair handed out on login, register and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// JWT authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Missing credentials")]
    MissingCredentials,
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),
    #[error("Email already registered")]
    EmailTaken,
    #[error("Token creation failed")]
    TokenCreation,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token type")]
    InvalidTokenType,
    #[error("Missing authorization header")]
    MissingAuthHeader,
    #[error("Unknown user")]
    UnknownUser,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials | AuthError::InvalidRegistration(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::TokenCreation => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::InvalidTokenType
            | AuthError::MissingAuthHeader
            | AuthError::UnknownUser => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidRegistration(_) => "invalid_registration",
            AuthError::EmailTaken => "email_taken",
            AuthError::TokenCreation => "token_creation_failed",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidTokenType => "invalid_token_type",
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::UnknownUser => "unknown_user",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        }));

        (self.status(), body).into_response()
    }
}

/// Signs and verifies tokens for one issuer/audience pair
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl JwtService {
    pub fn new(secret: &str, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let audience = audience.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_audience(&[audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            audience,
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::days(30),
        }
    }

    pub fn with_ttls(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_ttl = access;
        self.refresh_ttl = refresh;
        self
    }

    /// Build claims for `user_id` valid from now
    pub fn claims_for(
        &self,
        user_id: &str,
        role: Role,
        tier: SubscriptionTier,
        token_type: TokenType,
    ) -> Claims {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };

        Claims {
            sub: user_id.to_string(),
            role,
            subscription_tier: tier,
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type,
        }
    }

    pub fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(|e| {
            warn!("Failed to sign token: {}", e);
            AuthError::TokenCreation
        })
    }

    pub fn generate_token_pair(
        &self,
        user_id: &str,
        role: Role,
        tier: SubscriptionTier,
    ) -> Result<TokenPair, AuthError> {
        let access = self.claims_for(user_id, role, tier, TokenType::Access);
        let refresh = self.claims_for(user_id, role, tier, TokenType::Refresh);

        Ok(TokenPair {
            access_token: self.encode(&access)?,
            refresh_token: self.encode(&refresh)?,
        })
    }

    /// Verify signature, issuer, audience and expiry
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                kind => {
                    debug!("Token rejected: {:?}", kind);
                    AuthError::InvalidToken
                }
            })
    }

    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_typed(token, TokenType::Access)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_typed(token, TokenType::Refresh)
    }

    fn verify_typed(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let claims = self.verify_token(token)?;
        if claims.token_type != expected {
            return Err(AuthError::InvalidTokenType);
        }
        Ok(claims)
    }
}

/// Bearer extraction; only access tokens are accepted
impl<S> FromRequestParts<S> for Claims
where
    AuthState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidToken)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidToken)?;

        let state = AuthState::from_ref(state);
        state.jwt.verify_access_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new("test-secret", "fbai-test", "fbai-clients")
    }

    #[test]
    fn test_token_pair_roundtrip() {
        let jwt = service();
        let pair = jwt
            .generate_token_pair("user-1", Role::User, SubscriptionTier::Premium)
            .unwrap();

        let access = jwt.verify_access_token(&pair.access_token).unwrap();
        assert_eq!(access.sub, "user-1");
        assert_eq!(access.subscription_tier, SubscriptionTier::Premium);
        assert_eq!(access.iss, "fbai-test");
        assert_eq!(access.aud, "fbai-clients");

        let refresh = jwt.verify_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(refresh.token_type, TokenType::Refresh);
        assert_eq!(refresh.role, Role::User);
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let jwt = service();
        let pair = jwt
            .generate_token_pair("user-1", Role::User, SubscriptionTier::Free)
            .unwrap();

        assert!(matches!(
            jwt.verify_access_token(&pair.refresh_token),
            Err(AuthError::InvalidTokenType)
        ));
        assert!(matches!(
            jwt.verify_refresh_token(&pair.access_token),
            Err(AuthError::InvalidTokenType)
        ));
    }

    #[test]
    fn test_wrong_audience_or_issuer_rejected() {
        let jwt = service();
        let token = jwt
            .generate_token_pair("user-1", Role::User, SubscriptionTier::Free)
            .unwrap()
            .access_token;

        let other_audience = JwtService::new("test-secret", "fbai-test", "someone-else");
        assert!(matches!(
            other_audience.verify_token(&token),
            Err(AuthError::InvalidToken)
        ));

        let other_issuer = JwtService::new("test-secret", "impostor", "fbai-clients");
        assert!(matches!(
            other_issuer.verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service()
            .generate_token_pair("user-1", Role::User, SubscriptionTier::Free)
            .unwrap()
            .access_token;

        let other = JwtService::new("different-secret", "fbai-test", "fbai-clients");
        assert!(matches!(
            other.verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token() {
        let jwt = service().with_ttls(Duration::minutes(-5), Duration::days(30));
        let pair = jwt
            .generate_token_pair("user-1", Role::User, SubscriptionTier::Free)
            .unwrap();

        assert!(matches!(
            jwt.verify_access_token(&pair.access_token),
            Err(AuthError::TokenExpired)
        ));
        assert!(jwt.verify_refresh_token(&pair.refresh_token).is_ok());
    }

    #[test]
    fn test_token_without_tier_rejected() {
        let jwt = service();
        let now = Utc::now().timestamp();
        let stripped = json!({
            "sub": "user-1",
            "role": "user",
            "aud": "fbai-clients",
            "iss": "fbai-test",
            "iat": now,
            "exp": now + 3600,
            "tokenType": "access",
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &stripped,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(matches!(
            jwt.verify_token(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AuthError::EmailTaken.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::MissingCredentials.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::InvalidTokenType.code(), "invalid_token_type");
    }
}
