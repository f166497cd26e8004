//! FBAI Core - Shared data structures for the AI manager
//!
//! This module defines the domain types, error handling, configuration and
//! async helpers shared by the session client, the auth server and the CLI

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
