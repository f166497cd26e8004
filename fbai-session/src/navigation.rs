use fbai_core::{RouteConfig, SubscriptionTier};

/// Where the caller should send the user next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Login(String),
    Dashboard(String),
    AiDashboard(String),
}

impl Navigation {
    pub fn target(&self) -> &str {
        match self {
            Navigation::Login(path) | Navigation::Dashboard(path) | Navigation::AiDashboard(path) => {
                path
            }
        }
    }

    /// Landing page after a successful login
    pub fn after_login(tier: SubscriptionTier, routes: &RouteConfig) -> Self {
        if tier.is_premium() {
            Navigation::AiDashboard(routes.ai_dashboard.clone())
        } else {
            Navigation::Dashboard(routes.dashboard.clone())
        }
    }
}
