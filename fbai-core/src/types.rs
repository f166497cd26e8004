//! Core data type definitions

use serde::{Deserialize, Serialize};

/// Storage key holding the serialized user projection
pub const USER_KEY: &str = "user";
/// Storage key holding the access token
pub const TOKEN_KEY: &str = "token";
/// Storage key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Advisory staleness marker written next to every session write
pub const TIMESTAMP_KEY: &str = "sessionTimestamp";

/// The keys that make up a persisted session (the timestamp is advisory only)
pub const SESSION_KEYS: [&str; 3] = [USER_KEY, TOKEN_KEY, REFRESH_TOKEN_KEY];

/// Subscription tier claim deciding feature access
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Premium,
    #[default]
    #[serde(other)]
    Free,
}

impl SubscriptionTier {
    pub fn is_premium(&self) -> bool {
        matches!(self, SubscriptionTier::Premium)
    }

    /// Check whether this tier unlocks a feature
    pub fn allows(&self, feature: &Feature) -> bool {
        match feature {
            Feature::BasicPosting | Feature::Analytics => true,
            Feature::AutoResponses | Feature::TrendingTopics | Feature::AiDashboard => {
                self.is_premium()
            }
        }
    }

    /// All features unlocked by this tier
    pub fn features(&self) -> Vec<Feature> {
        Feature::ALL
            .iter()
            .filter(|feature| self.allows(feature))
            .cloned()
            .collect()
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionTier::Free => write!(f, "free"),
            SubscriptionTier::Premium => write!(f, "premium"),
        }
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(SubscriptionTier::Free),
            "premium" => Ok(SubscriptionTier::Premium),
            _ => Err(format!("Unknown subscription tier: {}", s)),
        }
    }
}

/// Account role carried in every issued token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Product features gated by subscription tier
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Scheduling and publishing posts
    BasicPosting,
    /// Page analytics
    Analytics,
    /// AI generated replies to comments and messages
    AutoResponses,
    /// AI trending-topic suggestions
    TrendingTopics,
    /// Access to the AI dashboard surface
    AiDashboard,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::BasicPosting,
        Feature::Analytics,
        Feature::AutoResponses,
        Feature::TrendingTopics,
        Feature::AiDashboard,
    ];
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feature::BasicPosting => write!(f, "basic_posting"),
            Feature::Analytics => write!(f, "analytics"),
            Feature::AutoResponses => write!(f, "auto_responses"),
            Feature::TrendingTopics => write!(f, "trending_topics"),
            Feature::AiDashboard => write!(f, "ai_dashboard"),
        }
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "basic_posting" => Ok(Feature::BasicPosting),
            "analytics" => Ok(Feature::Analytics),
            "auto_responses" => Ok(Feature::AutoResponses),
            "trending_topics" => Ok(Feature::TrendingTopics),
            "ai_dashboard" => Ok(Feature::AiDashboard),
            _ => Err(format!("Unknown feature: {}", s)),
        }
    }
}

/// Minimized user record cached on the client
///
/// Only the fields the UI needs are kept: identity, handle, display name,
/// tier and the posts-remaining counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProjection {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, alias = "displayName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "subscription")]
    pub subscription_tier: SubscriptionTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts_remaining: Option<u32>,
}

impl UserProjection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            name: None,
            subscription_tier: SubscriptionTier::Free,
            posts_remaining: None,
        }
    }

    pub fn with_tier(mut self, tier: SubscriptionTier) -> Self {
        self.subscription_tier = tier;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_posts_remaining(mut self, posts: u32) -> Self {
        self.posts_remaining = Some(posts);
        self
    }

    /// Best-effort label for display
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.id)
    }
}

/// The cached session triple
///
/// `user` stays serialized: it is an opaque blob written by the session
/// manager and parsed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.access_token.is_none() && self.refresh_token.is_none()
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }

    /// Parse the cached user blob. Corrupt blobs and orphaned identities yield `None`.
    pub fn user_projection(&self) -> Option<UserProjection> {
        self.access_token.as_ref()?;
        let raw = self.user.as_deref()?;
        serde_json::from_str(raw).ok()
    }
}

/// Login credentials sent to the login endpoint
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}
