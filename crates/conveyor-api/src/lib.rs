//! Administrative HTTP API for the conveyor dispatcher.
//!
//! A thin CRUD layer over the consumer store. Every successful mutation
//! commits first and then emits a supervisor event, so the runtime converges
//! on what the store says. There is no authentication on this surface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use tokio::sync::mpsc;

use conveyor_broker::ConsumerEvent;
use conveyor_core::storage::Storage;
use conveyor_delivery::Dispatcher;

pub use config::Config;
pub use server::{create_router, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Storage layer.
    pub storage: Storage,
    /// Event channel into the supervisor.
    pub events: mpsc::Sender<ConsumerEvent>,
    /// Dispatcher used to re-drive failed callbacks.
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Bundles the API's collaborators.
    pub fn new(
        storage: Storage,
        events: mpsc::Sender<ConsumerEvent>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self { storage, events, dispatcher }
    }
}
