//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Settings (validated)
//!     → GatewayConfig swapped into the running gateway
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new settings
//!     → validation.rs validates
//!     → Gateway::configure applies the new gateway section
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Runtime changes go through a partial patch, never field mutation

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_settings, parse_settings, ConfigError};
pub use schema::{
    GatewayConfig, GatewayConfigPatch, ObservabilityConfig, OperationKind, OperationTimeouts,
    Settings, TimeoutsPatch,
};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
