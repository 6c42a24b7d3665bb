//! Database initialization
//!
//! Opens (or creates) the SQLite database and runs the idempotent schema.
//! Schema creation runs once at process start; `updated_at` maintenance is
//! done by the writers themselves, so no triggers are installed.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every pooled connection
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    // WAL allows concurrent readers with one writer; pragmas are applied to
    // every pooled connection, not just the first one
    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_receipt_file_table(pool).await?;
    create_receipt_table(pool).await?;
    info!("Database tables initialized (receipt_file, receipt)");
    Ok(())
}

/// One row per uploaded artifact; `file_path` tracks where the bytes live now
pub async fn create_receipt_file_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipt_file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL UNIQUE,
            file_path TEXT NOT NULL UNIQUE,
            is_valid INTEGER NOT NULL DEFAULT 0,
            invalid_reason TEXT,
            is_processed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_receipt_file_created_at ON receipt_file(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// At most one receipt per file, created on first successful extraction
pub async fn create_receipt_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipt (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            receipt_file_id INTEGER NOT NULL UNIQUE
                REFERENCES receipt_file(id) ON DELETE CASCADE,
            purchased_at TEXT,
            merchant_name TEXT,
            total_amount REAL,
            category TEXT,
            items TEXT NOT NULL DEFAULT '[]',
            file_path TEXT NOT NULL,
            raw_extracted_text TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_receipt_purchased_at ON receipt(purchased_at, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
