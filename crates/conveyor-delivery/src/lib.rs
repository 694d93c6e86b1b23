//! Callback dispatch path for the conveyor dispatcher.
//!
//! Owns the outbound HTTP surface: the callback client with its fixed identity
//! headers, the dispatcher that classifies results and drives retry schedules,
//! the best-effort alert webhook, and the access-log observer seam.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access_log;
pub mod alert;
pub mod client;
pub mod dispatch;
pub mod error;

pub use access_log::{AccessLog, DeliveryRecord, NoOpAccessLog, TracingAccessLog};
pub use alert::Alerter;
pub use client::{CallbackClient, CallbackResponse};
pub use dispatch::{Dispatcher, InboundMessage};
pub use error::{DeliveryError, Result};
