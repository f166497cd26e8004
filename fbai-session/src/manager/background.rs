//! Heartbeat and cross-context synchronization tasks

use super::{InFlight, ManagerInner, SessionManager};
use crate::storage::ExternalChange;
use fbai_core::SESSION_KEYS;
use std::sync::{Arc, PoisonError, Weak};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

impl SessionManager {
    fn from_weak(inner: &Weak<ManagerInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// (Re)start the periodic single-attempt validation
    pub(super) fn start_heartbeat(&self) {
        let period = self.inner.settings.heartbeat_interval;
        let weak = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = SessionManager::from_weak(&weak) else {
                    break;
                };
                manager.heartbeat_tick().await;
            }
        });

        let previous = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub(super) fn stop_heartbeat(&self) {
        let handle = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn heartbeat_active(&self) -> bool {
        self.inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// One heartbeat: skipped unless authenticated, idle and unlocked
    async fn heartbeat_tick(&self) {
        if !self.is_authenticated() {
            return;
        }
        let Some(_in_flight) = InFlight::enter(&self.inner.validating) else {
            debug!("Heartbeat skipped, validation in flight");
            return;
        };
        let Some(_guard) = self.inner.lock.try_acquire("heartbeat") else {
            debug!("Heartbeat skipped, session lock held");
            return;
        };

        debug!("Heartbeat validating session");
        self.validate_locked(1).await;
    }

    /// Reload from storage whenever another context changes a session key
    ///
    /// The reload waits for the session lock, so an in-flight validation or
    /// refresh finishes against the state it started with.
    pub(super) fn start_sync_listener(&self) {
        let weak = Arc::downgrade(&self.inner);

        let subscription = self.inner.storage.on_external_change(&SESSION_KEYS, move |change| {
            let Some(manager) = SessionManager::from_weak(&weak) else {
                return;
            };
            match &change {
                ExternalChange::Changed(event) => {
                    debug!(key = %event.key, origin = %event.origin, "Session changed elsewhere, reloading");
                }
                ExternalChange::Missed { skipped } => {
                    debug!(skipped, "Missed session changes, reloading");
                }
            }
            tokio::spawn(async move {
                let _guard = manager.inner.lock.acquire("sync_reload").await;
                manager.load_from_storage();
            });
        });

        let previous = self
            .inner
            .sync_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscription);
        drop(previous);
    }
}
