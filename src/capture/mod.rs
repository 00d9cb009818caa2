//! Traffic capture subsystem.
//!
//! # Data Flow
//! ```text
//! Request head parsed
//!     → recorder.rs (Transaction created, emitted as pending)
//!     → request body streamed to backend, chunks appended
//!     → response received, rewrite applied, Transaction completed
//!     → observer.rs (each emission handed to the TransactionObserver)
//!     → history.rs (optional: retained for the admin API)
//! ```
//!
//! # Design Decisions
//! - The core never retains transactions; retention belongs to observers
//! - Observers receive clones, so a consumer can never mutate proxy state

pub mod history;
pub mod observer;
pub mod recorder;
pub mod transaction;

pub use history::TrafficHistory;
pub use observer::{
    ChannelObserver, FanoutObserver, LoggingObserver, NoopObserver, TransactionObserver,
};
pub use recorder::{ExchangeGuard, Recorder, RecordingBody, CLIENT_CLOSED};
pub use transaction::{Transaction, TransactionId};
