//! Configuration management

use crate::async_utils::{BackoffStrategy, RetryConfig};
use crate::error::{ErrorContext, FbaiError, FbaiResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FbaiConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub routes: RouteConfig,
    pub logging: LoggingConfig,
}

/// Remote endpoints consumed by the session client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub login_path: String,
    pub profile_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    /// Upper bound for a single remote call
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            login_path: "/api/auth/login".to_string(),
            profile_path: "/api/auth/profile".to_string(),
            refresh_path: "/api/auth/refresh".to_string(),
            logout_path: "/api/auth/logout".to_string(),
            request_timeout_ms: 10_000,
            user_agent: "fbai/0.1".to_string(),
        }
    }
}

impl ApiConfig {
    /// Join the base URL and an endpoint path
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Session manager tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_validation_attempts: usize,
    /// Tokens shorter than this are treated as corrupted
    pub min_token_length: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub dependency_poll_interval_ms: u64,
    pub dependency_poll_attempts: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_validation_attempts: 3,
            min_token_length: 10,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 8000,
            heartbeat_interval_secs: 300,
            health_check_interval_secs: 600,
            dependency_poll_interval_ms: 100,
            dependency_poll_attempts: 50,
        }
    }
}

impl SessionConfig {
    /// Retry policy used by session validation
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_validation_attempts,
            initial_delay_ms: self.retry_base_delay_ms,
            max_delay_ms: self.retry_max_delay_ms,
            strategy: BackoffStrategy::Linear,
            jitter: false,
        }
    }
}

/// Locations of the mirrored session stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub primary_path: PathBuf,
    pub backup_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::in_dir(default_data_dir())
    }
}

impl StorageConfig {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            primary_path: dir.join("session.json"),
            backup_path: dir.join("session.backup.json"),
        }
    }
}

/// Navigation targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub login: String,
    pub dashboard: String,
    pub ai_dashboard: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            dashboard: "/dashboard".to_string(),
            ai_dashboard: "/ai-dashboard".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fbai")
}

/// Default location of the config file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fbai")
        .join("config.toml")
}

impl FbaiConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> FbaiResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| FbaiError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: FbaiConfig = toml::from_str(&content).map_err(|e| FbaiError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Load from `path` when it exists, otherwise use defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> FbaiResult<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> FbaiResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| FbaiError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| FbaiError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Apply `FBAI_*` environment overrides
    pub fn apply_env_overrides(mut self) -> FbaiResult<Self> {
        if let Ok(url) = std::env::var("FBAI_API_URL") {
            self.api.base_url = url;
        }
        if let Ok(timeout) = std::env::var("FBAI_REQUEST_TIMEOUT_MS") {
            self.api.request_timeout_ms = timeout.parse().map_err(|_| FbaiError::Config {
                message: format!("FBAI_REQUEST_TIMEOUT_MS is not a number: {}", timeout),
                source: None,
                context: ErrorContext::new("config").with_operation("env_override"),
            })?;
        }
        if let Ok(dir) = std::env::var("FBAI_DATA_DIR") {
            self.storage = StorageConfig::in_dir(dir);
        }
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> FbaiResult<()> {
        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(FbaiError::Config {
                message: format!("Invalid API base URL: {}", self.api.base_url),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.base_url to an absolute http(s) URL"),
            });
        }

        if self.api.request_timeout_ms == 0 {
            return Err(FbaiError::Config {
                message: "api.request_timeout_ms must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.request_timeout_ms to a positive value"),
            });
        }

        if self.session.max_validation_attempts == 0 {
            return Err(FbaiError::Config {
                message: "session.max_validation_attempts must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set session.max_validation_attempts to a positive value"),
            });
        }

        if self.session.heartbeat_interval_secs == 0
            || self.session.health_check_interval_secs == 0
        {
            return Err(FbaiError::Config {
                message: "Heartbeat and health check intervals must be greater than 0"
                    .to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Use positive interval values in seconds"),
            });
        }

        if self.storage.primary_path == self.storage.backup_path {
            return Err(FbaiError::Config {
                message: "Primary and backup stores must be different files".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Point storage.backup_path at a separate file"),
            });
        }

        Ok(())
    }
}
