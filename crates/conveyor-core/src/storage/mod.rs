//! SQLite storage layer implementing the repository pattern.
//!
//! Each table gets a typed repository; the `Storage` container shares one
//! connection pool across them. All database access in the workspace goes
//! through these repositories.

use std::sync::Arc;

use sqlx::SqlitePool;

pub mod consumers;
pub mod failed_callbacks;
pub mod settings;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for consumer definitions.
    pub consumers: Arc<consumers::Repository>,

    /// Repository for exhausted-delivery records.
    pub failed_callbacks: Arc<failed_callbacks::Repository>,

    /// Repository for the broker-config and retry-service singletons.
    pub settings: Arc<settings::Repository>,
}

impl Storage {
    /// Creates a new storage instance over the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        let pool = Arc::new(pool);

        Self {
            consumers: Arc::new(consumers::Repository::new(pool.clone())),
            failed_callbacks: Arc::new(failed_callbacks::Repository::new(pool.clone())),
            settings: Arc::new(settings::Repository::new(pool)),
        }
    }

    /// Creates the schema and seeds the singleton rows.
    ///
    /// Idempotent; safe to run on every process start.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.consumers.pool();

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS rabbitmq_config (
                id INTEGER PRIMARY KEY,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                vhost TEXT NOT NULL,
                user TEXT NOT NULL,
                password TEXT NOT NULL
            )
            ",
        )
        .execute(&*pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS consumers (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'stopped',
                queue_name TEXT NOT NULL,
                exchange_name TEXT NOT NULL,
                routing_key TEXT NOT NULL DEFAULT '',
                vhost TEXT NOT NULL DEFAULT '',
                death_queue_name TEXT NOT NULL DEFAULT '',
                death_queue_bind_exchange TEXT NOT NULL DEFAULT '',
                death_queue_bind_routing_key TEXT NOT NULL DEFAULT '',
                death_queue_ttl TEXT NOT NULL DEFAULT '',
                callback TEXT NOT NULL,
                retry_mode TEXT NOT NULL DEFAULT '',
                queue_count INTEGER NOT NULL DEFAULT 1,
                qos_prefetch INTEGER NOT NULL DEFAULT 1,
                auto_decode_base64 INTEGER NOT NULL DEFAULT 0,
                alert_token TEXT NOT NULL DEFAULT ''
            )
            ",
        )
        .execute(&*pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS retry_service_url (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL
            )
            ",
        )
        .execute(&*pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS url_failed (
                id INTEGER PRIMARY KEY,
                request_url TEXT NOT NULL,
                request_data TEXT NOT NULL,
                response_code INTEGER NOT NULL,
                response_content TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&*pool)
        .await?;

        self.settings.seed_defaults().await?;

        Ok(())
    }

    /// Performs a connectivity probe against the database.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` when the pool is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.consumers.pool()).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory storage with the schema applied, for unit tests.
    pub async fn memory_storage() -> Storage {
        let pool = SqlitePool::connect("sqlite::memory:").await.expect("open in-memory sqlite");
        let storage = Storage::new(pool);
        storage.migrate().await.expect("apply schema");
        storage
    }
}
