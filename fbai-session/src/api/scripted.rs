//! In-process [`AuthApi`] that replays queued replies
//!
//! Used for offline runs and for exercising the session manager without a
//! server. Every call is recorded so callers can assert on traffic.

use super::{AuthApi, LoginOutcome, RefreshedTokens};
use async_trait::async_trait;
use fbai_core::{Credentials, ErrorContext, FbaiError, FbaiResult, UserProjection};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One queued reply
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    /// Succeeds once the delay has passed
    After(Duration, T),
    /// HTTP 401
    Unauthorized,
    /// Non-401 HTTP failure
    Status(u16),
    /// Transport failure
    NetworkDown,
    /// Never completes; the caller's timeout decides
    Hang,
}

impl<T> Reply<T> {
    async fn resolve(self, operation: &str) -> FbaiResult<T> {
        let context = ErrorContext::new("scripted_auth_api").with_operation(operation);
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::After(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Reply::Unauthorized => Err(FbaiError::Unauthorized {
                message: "Invalid or expired token".to_string(),
                context,
            }),
            Reply::Status(status) => Err(FbaiError::Http {
                status,
                message: format!("Scripted status {}", status),
                context,
            }),
            Reply::NetworkDown => Err(FbaiError::Network {
                message: "Scripted network failure".to_string(),
                source: None,
                context,
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// A recorded call and the token or email it carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Login(String),
    FetchProfile(String),
    Refresh(String),
    Logout(String),
}

/// Queue-driven [`AuthApi`]
///
/// An empty queue answers with [`Reply::NetworkDown`], except for logout
/// which succeeds.
#[derive(Debug, Default)]
pub struct ScriptedAuthApi {
    logins: Mutex<VecDeque<Reply<LoginOutcome>>>,
    profiles: Mutex<VecDeque<Reply<UserProjection>>>,
    refreshes: Mutex<VecDeque<Reply<RefreshedTokens>>>,
    logouts: Mutex<VecDeque<Reply<()>>>,
    calls: Mutex<Vec<ApiCall>>,
}

fn pop<T>(queue: &Mutex<VecDeque<Reply<T>>>, fallback: Reply<T>) -> Reply<T> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
        .unwrap_or(fallback)
}

impl ScriptedAuthApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, reply: Reply<LoginOutcome>) -> &Self {
        self.logins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    pub fn push_profile(&self, reply: Reply<UserProjection>) -> &Self {
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    pub fn push_refresh(&self, reply: Reply<RefreshedTokens>) -> &Self {
        self.refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    pub fn push_logout(&self, reply: Reply<()>) -> &Self {
        self.logouts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn profile_calls(&self) -> usize {
        self.count(|call| matches!(call, ApiCall::FetchProfile(_)))
    }

    pub fn refresh_calls(&self) -> usize {
        self.count(|call| matches!(call, ApiCall::Refresh(_)))
    }

    pub fn logout_calls(&self) -> usize {
        self.count(|call| matches!(call, ApiCall::Logout(_)))
    }

    fn count(&self, predicate: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    fn record(&self, call: ApiCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl AuthApi for ScriptedAuthApi {
    async fn login(&self, credentials: &Credentials) -> FbaiResult<LoginOutcome> {
        self.record(ApiCall::Login(credentials.email.clone()));
        pop(&self.logins, Reply::NetworkDown).resolve("login").await
    }

    async fn fetch_profile(&self, access_token: &str) -> FbaiResult<UserProjection> {
        self.record(ApiCall::FetchProfile(access_token.to_string()));
        pop(&self.profiles, Reply::NetworkDown)
            .resolve("fetch_profile")
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> FbaiResult<RefreshedTokens> {
        self.record(ApiCall::Refresh(refresh_token.to_string()));
        pop(&self.refreshes, Reply::NetworkDown)
            .resolve("refresh")
            .await
    }

    async fn logout(&self, access_token: &str) -> FbaiResult<()> {
        self.record(ApiCall::Logout(access_token.to_string()));
        pop(&self.logouts, Reply::Ok(())).resolve("logout").await
    }
}
