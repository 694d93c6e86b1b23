//! Repository for the singleton configuration rows.
//!
//! `rabbitmq_config` and `retry_service_url` are one-row tables keyed on
//! id = 1, seeded with defaults on first start.

use std::sync::Arc;

use sqlx::{Row, SqlitePool};

use crate::{
    error::{CoreError, Result},
    models::BrokerConfig,
};

const SINGLETON_ID: i64 = 1;

/// Repository for the singleton settings tables.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Seeds default singleton rows when they are absent.
    pub(crate) async fn seed_defaults(&self) -> Result<()> {
        let defaults = BrokerConfig::default();
        sqlx::query(
            r"
            INSERT OR IGNORE INTO rabbitmq_config (id, host, port, vhost, user, password)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(SINGLETON_ID)
        .bind(&defaults.host)
        .bind(i64::from(defaults.port))
        .bind(&defaults.vhost)
        .bind(&defaults.user)
        .bind(&defaults.password)
        .execute(&*self.pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO retry_service_url (id, url) VALUES (?, '')")
            .bind(SINGLETON_ID)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Fetches the broker connection settings.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the singleton row is missing.
    pub async fn fetch_broker_config(&self) -> Result<BrokerConfig> {
        let row =
            sqlx::query("SELECT host, port, vhost, user, password FROM rabbitmq_config WHERE id = ?")
                .bind(SINGLETON_ID)
                .fetch_optional(&*self.pool)
                .await?
                .ok_or_else(|| CoreError::not_found("rabbitmq configuration"))?;

        Ok(BrokerConfig {
            host: row.try_get("host").map_err(CoreError::from)?,
            port: u16::try_from(row.try_get::<i64, _>("port").map_err(CoreError::from)?)
                .map_err(|_| CoreError::invalid("stored broker port out of range"))?,
            vhost: row.try_get("vhost").map_err(CoreError::from)?,
            user: row.try_get("user").map_err(CoreError::from)?,
            password: row.try_get("password").map_err(CoreError::from)?,
        })
    }

    /// Replaces the broker connection settings.
    pub async fn update_broker_config(&self, config: &BrokerConfig) -> Result<()> {
        sqlx::query(
            r"
            UPDATE rabbitmq_config SET host = ?, port = ?, vhost = ?, user = ?, password = ?
            WHERE id = ?
            ",
        )
        .bind(&config.host)
        .bind(i64::from(config.port))
        .bind(&config.vhost)
        .bind(&config.user)
        .bind(&config.password)
        .bind(SINGLETON_ID)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Fetches the external retry-service URL; empty when unconfigured.
    pub async fn fetch_retry_service_url(&self) -> Result<String> {
        let url: String = sqlx::query_scalar("SELECT url FROM retry_service_url WHERE id = ?")
            .bind(SINGLETON_ID)
            .fetch_optional(&*self.pool)
            .await?
            .unwrap_or_default();

        Ok(url)
    }

    /// Replaces the external retry-service URL.
    pub async fn update_retry_service_url(&self, url: &str) -> Result<()> {
        sqlx::query("UPDATE retry_service_url SET url = ? WHERE id = ?")
            .bind(url)
            .bind(SINGLETON_ID)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::memory_storage;

    #[tokio::test]
    async fn broker_config_update_round_trips() {
        let storage = memory_storage().await;

        let config = BrokerConfig {
            host: "rabbit.internal".to_string(),
            port: 5671,
            vhost: "orders".to_string(),
            user: "svc".to_string(),
            password: "secret".to_string(),
        };
        storage.settings.update_broker_config(&config).await.unwrap();

        assert_eq!(storage.settings.fetch_broker_config().await.unwrap(), config);
    }

    #[tokio::test]
    async fn retry_service_url_defaults_empty() {
        let storage = memory_storage().await;
        assert_eq!(storage.settings.fetch_retry_service_url().await.unwrap(), "");

        storage.settings.update_retry_service_url("http://retry.internal").await.unwrap();
        assert_eq!(
            storage.settings.fetch_retry_service_url().await.unwrap(),
            "http://retry.internal"
        );
    }
}
