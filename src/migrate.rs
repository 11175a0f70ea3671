//! Idempotent schema setup.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `logs` | one row per ingested line, with anomaly flag, optional template id and embedding blob |
//! | `templates` | one row per canonical pattern, with its frequency counter |
//!
//! Timestamps are stored as Unix milliseconds.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            raw_text TEXT NOT NULL,
            normalized_tokens TEXT NOT NULL DEFAULT '[]',
            is_anomaly INTEGER NOT NULL DEFAULT 0,
            template_id INTEGER,
            embedding BLOB,
            FOREIGN KEY (template_id) REFERENCES templates(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before the anomaly flag existed.
    let has_anomaly: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('logs') WHERE name = 'is_anomaly'",
    )
    .fetch_one(pool)
    .await?;
    if has_anomaly == 0 {
        sqlx::query("ALTER TABLE logs ADD COLUMN is_anomaly INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern TEXT NOT NULL UNIQUE,
            example TEXT NOT NULL,
            frequency INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_template_id ON logs(template_id, timestamp DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_anomaly ON logs(is_anomaly, timestamp DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
