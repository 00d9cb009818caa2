//! Response status rewriting.
//!
//! # Data Flow
//! ```text
//! Backend response status + request URL
//!     → engine.rs (snapshot of ordered rules)
//!     → rule.rs (status pattern + endpoint substring)
//!     → first usable match replaces the status
//! ```
//!
//! # Design Decisions
//! - Rules are validated when stored; `apply_rewrite` still tolerates a
//!   matching rule whose replacement is not a usable status and moves on
//! - The rule list is replaced wholesale on every mutation (read-copy-update)

pub mod engine;
pub mod rule;

pub use engine::RewriteEngine;
pub use rule::{RewriteRule, RuleError, StatusPattern};
