//! Page classification by URL path

use regex::Regex;
use std::sync::LazyLock;

static LOGIN_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(login|signin)(\.html)?/?$").expect("login page pattern is valid")
});

static DASHBOARD_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^/(dashboard|ai-dashboard|premium-dashboard|analytics|auto-responses|trending|settings|profile)(\.html)?(/.*)?$",
    )
    .expect("dashboard page pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Login,
    /// Any page that needs an authenticated session
    Dashboard,
    Other,
}

impl PageKind {
    /// Classify a path or absolute URL
    pub fn classify(location: &str) -> Self {
        let path = url::Url::parse(location)
            .map(|url| url.path().to_string())
            .unwrap_or_else(|_| {
                location
                    .split(['?', '#'])
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });
        let path = path.to_lowercase();

        if LOGIN_PAGE.is_match(&path) {
            PageKind::Login
        } else if DASHBOARD_PAGE.is_match(&path) {
            PageKind::Dashboard
        } else {
            PageKind::Other
        }
    }

    pub fn requires_session(&self) -> bool {
        matches!(self, PageKind::Dashboard)
    }
}
