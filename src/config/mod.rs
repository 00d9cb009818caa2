//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → CLI overrides applied by the binary
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new rewrite rules swapped into the RewriteEngine
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only rewrite rules are hot-reloaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CaptureConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    RuntimeConfig, TimeoutConfig,
};
pub use watcher::ConfigWatcher;
