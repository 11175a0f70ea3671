//! SQLite-backed [`Store`] implementation.
//!
//! Every [`Store`] method is a single SQL statement against the `logs`
//! and `templates` tables created by [`migrate`](crate::migrate), so
//! each write is atomic on its own. Catalog frequency is bumped in the
//! same `INSERT .. ON CONFLICT` that resolves the id.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use logsift_core::embedding::blob_to_vec;
use logsift_core::models::{EntryId, LogEntry, Template, TemplateId};
use logsift_core::store::Store;
use logsift_core::tokenize::{is_anomalous, normalize};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn count_log_entries(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_entry(row: &SqliteRow) -> LogEntry {
    let tokens_json: String = row.get("normalized_tokens");
    let raw_text: String = row.get("raw_text");
    let normalized_tokens = serde_json::from_str(&tokens_json).unwrap_or_else(|_| normalize(&raw_text));
    let embedding: Option<Vec<u8>> = row.get("embedding");

    LogEntry {
        id: row.get("id"),
        timestamp: from_millis(row.get("timestamp")),
        raw_text,
        normalized_tokens,
        template_id: row.get("template_id"),
        is_anomaly: row.get::<i64, _>("is_anomaly") != 0,
        embedding: embedding.map(|b| blob_to_vec(&b)),
    }
}

const ENTRY_COLUMNS: &str =
    "id, timestamp, raw_text, normalized_tokens, is_anomaly, template_id, embedding";

#[async_trait]
impl Store for SqliteStore {
    async fn append_log_entry(&self, raw_text: &str, timestamp: DateTime<Utc>) -> Result<EntryId> {
        let tokens = serde_json::to_string(&normalize(raw_text))?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO logs (timestamp, raw_text, normalized_tokens, is_anomaly) \
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(timestamp.timestamp_millis())
        .bind(raw_text)
        .bind(tokens)
        .bind(is_anomalous(raw_text))
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert log entry")?;
        Ok(id)
    }

    async fn attach_template(&self, id: EntryId, template_id: TemplateId) -> Result<()> {
        let result = sqlx::query("UPDATE logs SET template_id = ? WHERE id = ?")
            .bind(template_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("log entry {} not found", id);
        }
        Ok(())
    }

    async fn attach_embedding(&self, id: EntryId, vector_bytes: &[u8]) -> Result<()> {
        let result = sqlx::query("UPDATE logs SET embedding = ? WHERE id = ?")
            .bind(vector_bytes)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("log entry {} not found", id);
        }
        Ok(())
    }

    async fn get_log_entry(&self, id: EntryId) -> Result<Option<LogEntry>> {
        let row = sqlx::query(&format!("SELECT {} FROM logs WHERE id = ?", ENTRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_entry))
    }

    async fn query_by_time_window(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM logs WHERE timestamp >= ? ORDER BY timestamp DESC, id DESC",
            ENTRY_COLUMNS
        ))
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }

    async fn query_by_template(
        &self,
        template_id: TemplateId,
        since: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM logs WHERE template_id = ? AND timestamp >= ? \
             ORDER BY timestamp DESC, id DESC",
            ENTRY_COLUMNS
        ))
        .bind(template_id)
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }

    async fn query_anomalies(&self, since: DateTime<Utc>) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM logs WHERE is_anomaly = 1 AND timestamp >= ? \
             ORDER BY timestamp DESC, id DESC",
            ENTRY_COLUMNS
        ))
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }

    async fn catalog_get_or_create(&self, pattern: &str, example: &str) -> Result<TemplateId> {
        let now = Utc::now().timestamp_millis();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO templates (pattern, example, frequency, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?)
            ON CONFLICT(pattern) DO UPDATE SET
                frequency = frequency + 1,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(pattern)
        .bind(example)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert template")?;
        Ok(id)
    }

    async fn catalog_entries(&self) -> Result<Vec<Template>> {
        let rows = sqlx::query("SELECT id, pattern, example, frequency FROM templates ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let pattern: String = row.get("pattern");
                let frequency: i64 = row.get("frequency");
                Template {
                    id: row.get("id"),
                    canonical_pattern: pattern.split_whitespace().map(str::to_string).collect(),
                    frequency: frequency.max(0) as u64,
                    example_text: row.get("example"),
                }
            })
            .collect())
    }
}
