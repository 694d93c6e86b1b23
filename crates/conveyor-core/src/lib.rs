//! Core domain models and storage for the conveyor dispatcher.
//!
//! Provides the consumer definition types, the retry-schedule grammar, the
//! error taxonomy, and the SQLite-backed storage layer that every other crate
//! in the workspace builds on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod retry;
pub mod storage;

pub use error::{CoreError, Result};
pub use models::{
    BrokerConfig, CallbackAck, ConsumerSpec, ConsumerStatus, DeathQueueSpec, FailedCallback,
};
pub use retry::RetrySchedule;
