//! Repository for exhausted-delivery records.
//!
//! Rows are inserted by retry tasks after the schedule runs dry and removed by
//! explicit administrative retry or delete. There is no TTL.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::{
    error::{CoreError, Result},
    models::FailedCallback,
};

/// Repository for the `url_failed` table.
pub struct Repository {
    pool: Arc<SqlitePool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Records a delivery whose retries were all exhausted.
    ///
    /// `response_code` carries the status of the final attempt; transport
    /// errors are recorded as 0 with the error text as content.
    pub async fn insert(
        &self,
        request_url: &str,
        request_data: &str,
        response_code: i64,
        response_content: &str,
        queue_name: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO url_failed (
                request_url, request_data, response_code, response_content, queue_name, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(request_url)
        .bind(request_data)
        .bind(response_code)
        .bind(response_content)
        .bind(queue_name)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Lists all records, most recent first.
    pub async fn list(&self) -> Result<Vec<FailedCallback>> {
        let rows = sqlx::query(
            r"
            SELECT id, request_url, request_data, response_code, response_content,
                   queue_name, created_at
            FROM url_failed
            ORDER BY created_at DESC, id DESC
            ",
        )
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(map_row).collect()
    }

    /// Fetches a single record by id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no row matches.
    pub async fn fetch(&self, id: i64) -> Result<FailedCallback> {
        let row = sqlx::query(
            r"
            SELECT id, request_url, request_data, response_code, response_content,
                   queue_name, created_at
            FROM url_failed
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("failed callback {id}")))?;

        map_row(&row)
    }

    /// Deletes a record.
    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM url_failed WHERE id = ?").bind(id).execute(&*self.pool).await?;
        Ok(())
    }
}

fn map_row(row: &SqliteRow) -> Result<FailedCallback> {
    Ok(FailedCallback {
        id: row.try_get("id").map_err(CoreError::from)?,
        request_url: row.try_get("request_url").map_err(CoreError::from)?,
        request_data: row.try_get("request_data").map_err(CoreError::from)?,
        response_code: row.try_get("response_code").map_err(CoreError::from)?,
        response_content: row.try_get("response_content").map_err(CoreError::from)?,
        queue_name: row.try_get("queue_name").map_err(CoreError::from)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(CoreError::from)?,
    })
}
