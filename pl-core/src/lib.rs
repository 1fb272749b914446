//! Parley Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other Parley crates:
//! - Application configuration (database, logging, collection scans, ephemeral timers)
//! - Global error types covering all error categories
//! - Structured logging with tracing
//! - Platform directory lookup
//! - The execution context identifier shared by models and services

pub mod config;
pub mod constants;
pub mod context_kind;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use context_kind::ContextKind;
pub use error::{PlError, PlResult};
pub use logging::init_logging;
pub use platform::Platform;
