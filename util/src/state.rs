//! Application state container shared across Axum route handlers.
//!
//! Holds the database connection and the outbound event bus. It is cloned into
//! route handlers via Axum's `State<T>` extractor.

use crate::events::EventBus;
use sea_orm::DatabaseConnection;

/// Central application state shared across the server.
#[derive(Clone)]
pub struct AppState {
    db: DatabaseConnection,
    events: EventBus,
}

impl AppState {
    pub fn new(db: DatabaseConnection, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Returns a shared reference to the internal `DatabaseConnection`.
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Returns a shared reference to the outbound event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
