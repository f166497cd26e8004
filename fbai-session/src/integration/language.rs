//! Language switching that cannot log the user out

use crate::manager::SessionManager;
use async_trait::async_trait;
use fbai_core::FbaiResult;
use std::sync::Arc;

/// A page-level collaborator that changes the UI language
///
/// Implementations may rewrite or reset storage as a side effect.
#[async_trait]
pub trait LanguageSwitcher: Send + Sync {
    async fn change_language(&self, language: &str) -> FbaiResult<()>;

    fn current_language(&self) -> String;
}

/// Wraps a switcher so every change runs inside
/// [`SessionManager::preserve_during`]
pub struct PreservingLanguageSwitcher {
    inner: Arc<dyn LanguageSwitcher>,
    manager: SessionManager,
}

impl PreservingLanguageSwitcher {
    pub fn new(inner: Arc<dyn LanguageSwitcher>, manager: SessionManager) -> Self {
        Self { inner, manager }
    }
}

#[async_trait]
impl LanguageSwitcher for PreservingLanguageSwitcher {
    async fn change_language(&self, language: &str) -> FbaiResult<()> {
        let inner = Arc::clone(&self.inner);
        let language = language.to_string();
        self.manager
            .preserve_during(|| async move { inner.change_language(&language).await })
            .await
    }

    fn current_language(&self) -> String {
        self.inner.current_language()
    }
}
