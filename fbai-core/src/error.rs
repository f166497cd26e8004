//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type FbaiResult<T> = Result<T, FbaiError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the session client and its collaborators
#[derive(Error, Debug)]
pub enum FbaiError {
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        context: ErrorContext,
    },

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        context: ErrorContext,
    },

    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        context: ErrorContext,
    },

    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl FbaiError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            FbaiError::Storage { context, .. } => Some(context),
            FbaiError::Config { context, .. } => Some(context),
            FbaiError::Network { context, .. } => Some(context),
            FbaiError::Timeout { context, .. } => Some(context),
            FbaiError::Unauthorized { context, .. } => Some(context),
            FbaiError::Http { context, .. } => Some(context),
            FbaiError::Protocol { context, .. } => Some(context),
            FbaiError::Authentication { context, .. } => Some(context),
            FbaiError::Validation { context, .. } => Some(context),
            FbaiError::Internal { context, .. } => Some(context),
            FbaiError::Io(_) | FbaiError::Serialization(_) => None,
        }
    }

    /// Check if error is recoverable by retrying the same request
    pub fn is_recoverable(&self) -> bool {
        match self {
            FbaiError::Network { .. } => true,
            FbaiError::Timeout { .. } => true,
            FbaiError::Protocol { .. } => true,
            FbaiError::Http { status, .. } => *status >= 500,
            FbaiError::Unauthorized { .. } => false,
            FbaiError::Authentication { .. } => false,
            FbaiError::Config { .. } => false,
            FbaiError::Validation { .. } => false,
            _ => false,
        }
    }

    /// True for an HTTP 401 from a remote endpoint
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FbaiError::Unauthorized { .. })
    }

    /// Get retry delay in milliseconds for recoverable errors
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            FbaiError::Network { .. } => Some(1000),
            FbaiError::Timeout { .. } => Some(2000),
            FbaiError::Protocol { .. } => Some(1000),
            FbaiError::Http { status, .. } if *status >= 500 => Some(1000),
            _ => None,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            FbaiError::Internal { .. } | FbaiError::Storage { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Internal or storage error occurred"
                );
            }
            FbaiError::Config { .. } | FbaiError::Validation { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration or validation error"
                );
            }
            FbaiError::Network { .. }
            | FbaiError::Timeout { .. }
            | FbaiError::Protocol { .. }
            | FbaiError::Http { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Remote call failed (may be recoverable)"
                );
            }
            FbaiError::Unauthorized { .. } | FbaiError::Authentication { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Credentials rejected"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! storage_error {
    ($msg:expr, $component:expr) => {
        $crate::FbaiError::Storage {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::FbaiError::Storage {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::FbaiError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'fbai config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr, $component:expr) => {
        $crate::FbaiError::Protocol {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check that the API base URL points at a compatible server"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::FbaiError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}
