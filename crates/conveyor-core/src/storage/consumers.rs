//! Repository for consumer definition rows.
//!
//! The death-queue block is flattened into four columns; an empty death-queue
//! name means the block is absent. Stored zeroes for `queue_count` and
//! `qos_prefetch` are preserved as written and coerced at worker start.

use std::sync::Arc;

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    error::{CoreError, Result},
    models::{ConsumerSpec, ConsumerStatus, DeathQueueSpec},
};

/// Repository for the `consumers` table.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Returns the shared database pool.
    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    /// Fetches a single definition by id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no row matches.
    pub async fn fetch(&self, id: &str) -> Result<ConsumerSpec> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM consumers WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("consumer {id}")))?;

        map_row(&row)
    }

    /// Lists every stored definition.
    pub async fn list(&self) -> Result<Vec<ConsumerSpec>> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM consumers ORDER BY id"))
            .fetch_all(&*self.pool)
            .await?;

        rows.iter().map(map_row).collect()
    }

    /// Inserts a definition and returns the assigned id.
    ///
    /// The `id` field of the argument is ignored; SQLite assigns the row id.
    pub async fn insert(&self, spec: &ConsumerSpec) -> Result<i64> {
        let death_queue = spec.death_queue.clone().unwrap_or_else(empty_death_queue);

        let result = sqlx::query(
            r"
            INSERT INTO consumers (
                name, description, status, queue_name, exchange_name, routing_key, vhost,
                death_queue_name, death_queue_bind_exchange, death_queue_bind_routing_key,
                death_queue_ttl, callback, retry_mode, queue_count, qos_prefetch,
                auto_decode_base64, alert_token
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&spec.name)
        .bind(&spec.description)
        .bind(spec.status.to_string())
        .bind(&spec.queue_name)
        .bind(&spec.exchange_name)
        .bind(&spec.routing_key)
        .bind(&spec.vhost)
        .bind(&death_queue.queue_name)
        .bind(&death_queue.bind_exchange)
        .bind(&death_queue.bind_routing_key)
        .bind(&death_queue.ttl)
        .bind(&spec.callback)
        .bind(&spec.retry_mode)
        .bind(i64::from(spec.queue_count))
        .bind(i64::from(spec.qos_prefetch))
        .bind(spec.auto_decode_base64)
        .bind(spec.alert_token.as_deref().unwrap_or_default())
        .execute(&*self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Updates an existing definition in place.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the id does not exist.
    pub async fn update(&self, spec: &ConsumerSpec) -> Result<()> {
        let death_queue = spec.death_queue.clone().unwrap_or_else(empty_death_queue);

        let result = sqlx::query(
            r"
            UPDATE consumers SET
                name = ?, description = ?, status = ?, queue_name = ?, exchange_name = ?,
                routing_key = ?, vhost = ?, death_queue_name = ?,
                death_queue_bind_exchange = ?, death_queue_bind_routing_key = ?,
                death_queue_ttl = ?, callback = ?, retry_mode = ?, queue_count = ?,
                qos_prefetch = ?, auto_decode_base64 = ?, alert_token = ?
            WHERE id = ?
            ",
        )
        .bind(&spec.name)
        .bind(&spec.description)
        .bind(spec.status.to_string())
        .bind(&spec.queue_name)
        .bind(&spec.exchange_name)
        .bind(&spec.routing_key)
        .bind(&spec.vhost)
        .bind(&death_queue.queue_name)
        .bind(&death_queue.bind_exchange)
        .bind(&death_queue.bind_routing_key)
        .bind(&death_queue.ttl)
        .bind(&spec.callback)
        .bind(&spec.retry_mode)
        .bind(i64::from(spec.queue_count))
        .bind(i64::from(spec.qos_prefetch))
        .bind(spec.auto_decode_base64)
        .bind(spec.alert_token.as_deref().unwrap_or_default())
        .bind(&spec.id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("consumer {}", spec.id)));
        }
        Ok(())
    }

    /// Deletes a definition.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM consumers WHERE id = ?").bind(id).execute(&*self.pool).await?;
        Ok(())
    }

    /// Updates only the status column.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the id does not exist.
    pub async fn set_status(&self, id: &str, status: ConsumerStatus) -> Result<()> {
        let result = sqlx::query("UPDATE consumers SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&*self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("consumer {id}")));
        }
        Ok(())
    }
}

const COLUMNS: &str = "id, name, description, status, queue_name, exchange_name, routing_key, \
                       vhost, death_queue_name, death_queue_bind_exchange, \
                       death_queue_bind_routing_key, death_queue_ttl, callback, retry_mode, \
                       queue_count, qos_prefetch, auto_decode_base64, alert_token";

fn empty_death_queue() -> DeathQueueSpec {
    DeathQueueSpec {
        queue_name: String::new(),
        bind_exchange: String::new(),
        bind_routing_key: String::new(),
        ttl: String::new(),
    }
}

fn map_row(row: &SqliteRow) -> Result<ConsumerSpec> {
    let status: String = row.try_get("status").map_err(CoreError::from)?;
    let death_queue_name: String = row.try_get("death_queue_name").map_err(CoreError::from)?;

    let death_queue = if death_queue_name.is_empty() {
        None
    } else {
        Some(DeathQueueSpec {
            queue_name: death_queue_name,
            bind_exchange: row.try_get("death_queue_bind_exchange").map_err(CoreError::from)?,
            bind_routing_key: row
                .try_get("death_queue_bind_routing_key")
                .map_err(CoreError::from)?,
            ttl: row.try_get("death_queue_ttl").map_err(CoreError::from)?,
        })
    };

    let alert_token: String = row.try_get("alert_token").map_err(CoreError::from)?;

    Ok(ConsumerSpec {
        id: row.try_get::<i64, _>("id").map_err(CoreError::from)?.to_string(),
        name: row.try_get("name").map_err(CoreError::from)?,
        description: row.try_get("description").map_err(CoreError::from)?,
        queue_name: row.try_get("queue_name").map_err(CoreError::from)?,
        exchange_name: row.try_get("exchange_name").map_err(CoreError::from)?,
        routing_key: row.try_get("routing_key").map_err(CoreError::from)?,
        vhost: row.try_get("vhost").map_err(CoreError::from)?,
        callback: row.try_get("callback").map_err(CoreError::from)?,
        status: status.parse()?,
        qos_prefetch: u16::try_from(row.try_get::<i64, _>("qos_prefetch").map_err(CoreError::from)?)
            .unwrap_or(1),
        auto_decode_base64: row.try_get("auto_decode_base64").map_err(CoreError::from)?,
        queue_count: u32::try_from(row.try_get::<i64, _>("queue_count").map_err(CoreError::from)?)
            .unwrap_or(1),
        death_queue,
        retry_mode: row.try_get("retry_mode").map_err(CoreError::from)?,
        alert_token: if alert_token.is_empty() { None } else { Some(alert_token) },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::memory_storage;

    fn spec() -> ConsumerSpec {
        ConsumerSpec {
            id: String::new(),
            name: "orders".to_string(),
            description: "order sync".to_string(),
            queue_name: "orders.sync".to_string(),
            exchange_name: "orders".to_string(),
            routing_key: "orders.*".to_string(),
            vhost: String::new(),
            callback: "http://api.internal/orders/sync".to_string(),
            status: ConsumerStatus::Running,
            qos_prefetch: 4,
            auto_decode_base64: true,
            queue_count: 2,
            death_queue: Some(DeathQueueSpec {
                queue_name: "orders.death".to_string(),
                bind_exchange: "orders".to_string(),
                bind_routing_key: "orders.death".to_string(),
                ttl: "30s".to_string(),
            }),
            retry_mode: "5s,1m".to_string(),
            alert_token: Some("tok-123".to_string()),
        }
    }

    #[tokio::test]
    async fn insert_then_fetch_round_trips() {
        let storage = memory_storage().await;

        let id = storage.consumers.insert(&spec()).await.unwrap();
        let fetched = storage.consumers.fetch(&id.to_string()).await.unwrap();

        assert_eq!(fetched.name, "orders");
        assert_eq!(fetched.qos_prefetch, 4);
        assert_eq!(fetched.queue_count, 2);
        assert!(fetched.auto_decode_base64);
        assert_eq!(fetched.death_queue.as_ref().unwrap().ttl, "30s");
        assert_eq!(fetched.alert_token.as_deref(), Some("tok-123"));
    }

    #[tokio::test]
    async fn missing_death_queue_maps_to_none() {
        let storage = memory_storage().await;

        let mut stored = spec();
        stored.death_queue = None;
        stored.alert_token = None;
        let id = storage.consumers.insert(&stored).await.unwrap();

        let fetched = storage.consumers.fetch(&id.to_string()).await.unwrap();
        assert_eq!(fetched.death_queue, None);
        assert_eq!(fetched.alert_token, None);
    }

    #[tokio::test]
    async fn fetch_unknown_id_is_not_found() {
        let storage = memory_storage().await;
        let err = storage.consumers.fetch("404").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_replaces_all_fields() {
        let storage = memory_storage().await;
        let id = storage.consumers.insert(&spec()).await.unwrap();

        let mut updated = spec();
        updated.id = id.to_string();
        updated.status = ConsumerStatus::Stopped;
        updated.retry_mode = String::new();
        updated.death_queue = None;
        storage.consumers.update(&updated).await.unwrap();

        let fetched = storage.consumers.fetch(&id.to_string()).await.unwrap();
        assert_eq!(fetched.status, ConsumerStatus::Stopped);
        assert_eq!(fetched.retry_mode, "");
        assert_eq!(fetched.death_queue, None);
    }

    #[tokio::test]
    async fn set_status_only_touches_status() {
        let storage = memory_storage().await;
        let id = storage.consumers.insert(&spec()).await.unwrap();

        storage
            .consumers
            .set_status(&id.to_string(), ConsumerStatus::Stopped)
            .await
            .unwrap();

        let fetched = storage.consumers.fetch(&id.to_string()).await.unwrap();
        assert_eq!(fetched.status, ConsumerStatus::Stopped);
        assert_eq!(fetched.retry_mode, "5s,1m");
    }

    #[tokio::test]
    async fn set_status_on_unknown_id_is_not_found() {
        let storage = memory_storage().await;
        let err = storage.consumers.set_status("404", ConsumerStatus::Running).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let storage = memory_storage().await;
        let id = storage.consumers.insert(&spec()).await.unwrap();

        storage.consumers.delete(&id.to_string()).await.unwrap();

        assert!(storage.consumers.list().await.unwrap().is_empty());
    }
}
