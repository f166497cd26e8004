//! Change notifications between execution contexts sharing a store

use std::fmt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one execution context (one session manager instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A key was written or removed by some context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub origin: ContextId,
    /// `None` when the key was removed
    pub new_value: Option<String>,
}

/// What a change listener hears about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChange {
    Changed(StorageEvent),
    /// The listener fell behind and `skipped` events were lost, so any key
    /// may have changed
    Missed { skipped: u64 },
}

/// Fan-out channel shared by every context attached to the same stores
#[derive(Debug, Clone)]
pub struct StorageBus {
    sender: broadcast::Sender<StorageEvent>,
}

impl StorageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: StorageEvent) {
        // No receivers is the normal single-context case
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StorageBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Handle to a background listener. Dropping it stops the listener.
#[derive(Debug, Default)]
pub struct ChangeSubscription {
    handle: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    pub(crate) fn spawn<F>(mut receiver: broadcast::Receiver<StorageEvent>, filter: F) -> Self
    where
        F: Fn(ExternalChange) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => filter(ExternalChange::Changed(event)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Storage listener lagged behind, some events were dropped");
                        filter(ExternalChange::Missed { skipped });
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Storage bus closed, stopping listener");
                        break;
                    }
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    pub(crate) fn from_handle(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// A subscription that never fires
    pub fn inactive() -> Self {
        Self { handle: None }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_stops_the_listener() {
        let bus = StorageBus::default();
        let mut subscription = ChangeSubscription::spawn(bus.subscribe(), |_| {});
        assert!(subscription.is_active());
        assert_eq!(bus.receiver_count(), 1);

        subscription.cancel();
        assert!(!subscription.is_active());

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while bus.receiver_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
