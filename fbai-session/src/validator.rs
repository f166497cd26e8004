//! Structural checks on the cached session triple
//!
//! These checks never touch the network. They catch state that can only be
//! the result of a half-finished write or tampering, so the manager can
//! discard it before trusting any of it.

use fbai_core::SessionState;
use std::fmt;

/// Why a cached session was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// The user blob is not a JSON object
    UnparseableUser,
    /// The access token is shorter than the configured minimum
    ImplausibleToken { length: usize },
    /// A user is cached without an access token
    OrphanedIdentity,
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corruption::UnparseableUser => write!(f, "cached user is not a JSON object"),
            Corruption::ImplausibleToken { length } => {
                write!(f, "access token is implausibly short ({} chars)", length)
            }
            Corruption::OrphanedIdentity => write!(f, "user is cached without an access token"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionValidator {
    min_token_length: usize,
}

impl Default for SessionValidator {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SessionValidator {
    pub fn new(min_token_length: usize) -> Self {
        Self { min_token_length }
    }

    pub fn min_token_length(&self) -> usize {
        self.min_token_length
    }

    /// First problem found, if any. An empty state is valid.
    pub fn diagnose(&self, state: &SessionState) -> Option<Corruption> {
        if let Some(user) = &state.user {
            let is_object = serde_json::from_str::<serde_json::Value>(user)
                .map(|value| value.is_object())
                .unwrap_or(false);
            if !is_object {
                return Some(Corruption::UnparseableUser);
            }
        }

        if let Some(token) = &state.access_token {
            let length = token.chars().count();
            if length < self.min_token_length {
                return Some(Corruption::ImplausibleToken { length });
            }
        }

        if state.user.is_some() && state.access_token.is_none() {
            return Some(Corruption::OrphanedIdentity);
        }

        None
    }

    pub fn is_valid(&self, state: &SessionState) -> bool {
        self.diagnose(state).is_none()
    }
}
