//! Server-side validation of the cached session and token refresh

use super::{ClearReason, InFlight, SessionEvent, SessionManager};
use fbai_core::{REFRESH_TOKEN_KEY, TOKEN_KEY};
use tracing::{debug, info, warn};

impl SessionManager {
    /// Confirm the cached token with the profile endpoint
    ///
    /// Returns `false` at once when another validation is in flight or no
    /// token is cached. A 401 on the first attempt triggers one refresh and
    /// a retry that does not count as an attempt; any other 401 clears the
    /// session. Transient failures are retried with a growing delay. When
    /// attempts run out, a cached user keeps the session alive.
    pub async fn validate(&self, max_attempts: usize) -> bool {
        let Some(_in_flight) = InFlight::enter(&self.inner.validating) else {
            debug!("Validation already in flight, skipping");
            return false;
        };

        let guard = self.inner.lock.acquire("validate").await;
        let valid = self.validate_locked(max_attempts.max(1)).await;
        drop(guard);

        if valid {
            self.start_heartbeat();
        }
        valid
    }

    /// Exchange the refresh token for a new access token
    ///
    /// `false` when there is no refresh token or the server refuses. The
    /// session is left as it was in that case.
    pub async fn refresh_token(&self) -> bool {
        let _guard = self.inner.lock.acquire("refresh_token").await;
        self.refresh_locked().await
    }

    pub(super) async fn validate_locked(&self, max_attempts: usize) -> bool {
        let Some(mut token) = self.token() else {
            debug!("No access token cached, nothing to validate");
            return false;
        };

        let mut attempt = 0;
        let mut refreshed = false;

        while attempt < max_attempts {
            attempt += 1;

            let outcome = self
                .remote("fetch_profile", self.inner.api.fetch_profile(&token))
                .await;

            match outcome {
                Ok(user) => {
                    if !self.still_holds(TOKEN_KEY, &token) {
                        info!(user_id = %user.id, "Session changed during validation, discarding result");
                        return false;
                    }
                    if let Err(e) = self.persist_user(&user) {
                        e.log();
                        self.clear_everywhere(ClearReason::StorageFailure);
                        return false;
                    }
                    info!(user_id = %user.id, attempt, "Session validated");
                    self.emit(SessionEvent::Authenticated { user_id: user.id });
                    return true;
                }
                Err(e) if e.is_unauthorized() => {
                    if attempt == 1 && !refreshed && self.has_refresh_token() {
                        refreshed = true;
                        debug!("Access token rejected, trying refresh");
                        if self.refresh_locked().await {
                            if let Some(fresh) = self.token() {
                                token = fresh;
                                attempt -= 1;
                                continue;
                            }
                        }
                    }
                    warn!("Server rejected the session, clearing it");
                    self.clear_everywhere(ClearReason::Unauthorized);
                    return false;
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Session validation attempt failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.inner.settings.retry.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        if self.current_user().is_some() {
            warn!(max_attempts, "Validation attempts exhausted, keeping cached session");
            true
        } else {
            warn!(max_attempts, "Validation attempts exhausted with no cached user, clearing session");
            self.clear_everywhere(ClearReason::ValidationExhausted);
            false
        }
    }

    pub(super) async fn refresh_locked(&self) -> bool {
        let Some(refresh_token) = self.snapshot().refresh_token else {
            debug!("No refresh token cached");
            return false;
        };

        let outcome = self
            .remote("refresh_token", self.inner.api.refresh(&refresh_token))
            .await;

        match outcome {
            Ok(tokens) => {
                if !self.still_holds(REFRESH_TOKEN_KEY, &refresh_token) {
                    info!("Session changed during refresh, discarding new tokens");
                    return false;
                }
                if let Err(e) =
                    self.persist_tokens(&tokens.access_token, tokens.refresh_token.as_deref())
                {
                    e.log();
                    self.clear_everywhere(ClearReason::StorageFailure);
                    return false;
                }
                info!(rotated = tokens.refresh_token.is_some(), "Access token refreshed");
                self.emit(SessionEvent::TokenRefreshed);
                true
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                false
            }
        }
    }

    /// Whether `key` still holds `expected` both here and in storage
    ///
    /// Another context may log out or log in while a request is in flight;
    /// its result must not be written over the newer session.
    fn still_holds(&self, key: &str, expected: &str) -> bool {
        let snapshot = self.snapshot();
        let cached = if key == TOKEN_KEY {
            snapshot.access_token
        } else {
            snapshot.refresh_token
        };
        if cached.as_deref() != Some(expected) {
            return false;
        }

        match self.inner.storage.read(key) {
            Ok(stored) => stored.as_deref() == Some(expected),
            Err(e) => {
                warn!(key, error = %e, "Could not re-read session key");
                false
            }
        }
    }
}
