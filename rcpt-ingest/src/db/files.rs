//! receipt_file table operations
//!
//! Every mutating statement writes `updated_at` itself.

use rcpt_common::db::{FileRecord, SqlValue, Store, StoreTransaction};
use rcpt_common::time::db_timestamp;
use rcpt_common::Result;

const FILE_COLUMNS: &str =
    "id, file_name, file_path, is_valid, invalid_reason, is_processed, created_at, updated_at";

/// Insert a freshly uploaded file (unvalidated, unprocessed)
pub async fn insert_file(store: &Store, file_name: &str, file_path: &str) -> Result<i64> {
    let now = db_timestamp();
    let outcome = store
        .execute(
            r#"
            INSERT INTO receipt_file (file_name, file_path, is_valid, invalid_reason, is_processed, created_at, updated_at)
            VALUES (?, ?, 0, NULL, 0, ?, ?)
            "#,
            &[file_name.into(), file_path.into(), (&now).into(), now.into()],
        )
        .await?;
    Ok(outcome.last_insert_id)
}

pub async fn load_file(store: &Store, id: i64) -> Result<Option<FileRecord>> {
    let sql = format!("SELECT {} FROM receipt_file WHERE id = ?", FILE_COLUMNS);
    store
        .fetch_one(&sql, &[id.into()])
        .await?
        .map(|row| FileRecord::from_row(&row))
        .transpose()
}

pub async fn load_file_by_name(store: &Store, file_name: &str) -> Result<Option<FileRecord>> {
    let sql = format!("SELECT {} FROM receipt_file WHERE file_name = ?", FILE_COLUMNS);
    store
        .fetch_one(&sql, &[file_name.into()])
        .await?
        .map(|row| FileRecord::from_row(&row))
        .transpose()
}

/// All file records, newest first
pub async fn list_files(store: &Store) -> Result<Vec<FileRecord>> {
    let sql = format!(
        "SELECT {} FROM receipt_file ORDER BY created_at DESC, id DESC",
        FILE_COLUMNS
    );
    store
        .fetch_all(&sql, &[])
        .await?
        .iter()
        .map(FileRecord::from_row)
        .collect()
}

/// Point an existing record at newly staged bytes and reset it to unvalidated
///
/// Returns the number of rows changed; 0 means the record is gone.
pub async fn reset_for_reupload(store: &Store, id: i64, file_path: &str) -> Result<u64> {
    let outcome = store
        .execute(
            r#"
            UPDATE receipt_file
            SET file_path = ?, is_valid = 0, invalid_reason = NULL, is_processed = 0, updated_at = ?
            WHERE id = ?
            "#,
            &[file_path.into(), db_timestamp().into(), id.into()],
        )
        .await?;
    Ok(outcome.rows_changed)
}

pub async fn mark_valid(store: &Store, id: i64) -> Result<()> {
    store
        .execute(
            "UPDATE receipt_file SET is_valid = 1, invalid_reason = NULL, updated_at = ? WHERE id = ?",
            &[db_timestamp().into(), id.into()],
        )
        .await?;
    Ok(())
}

/// Record a failure reason; the file is neither valid nor processed afterwards
pub async fn mark_invalid(store: &Store, id: i64, reason: &str) -> Result<()> {
    store
        .execute(
            r#"
            UPDATE receipt_file
            SET is_valid = 0, invalid_reason = ?, is_processed = 0, updated_at = ?
            WHERE id = ?
            "#,
            &[reason.into(), db_timestamp().into(), id.into()],
        )
        .await?;
    Ok(())
}

/// Record the final location after a successful move
pub async fn mark_processed(tx: &mut StoreTransaction, id: i64, final_path: &str) -> Result<u64> {
    let outcome = tx
        .execute(
            r#"
            UPDATE receipt_file
            SET file_path = ?, is_processed = 1, invalid_reason = NULL, updated_at = ?
            WHERE id = ?
            "#,
            &[final_path.into(), db_timestamp().into(), id.into()],
        )
        .await?;
    Ok(outcome.rows_changed)
}

pub async fn count_files_named(store: &Store, file_name: &str) -> Result<i64> {
    let row = store
        .fetch_one(
            "SELECT COUNT(*) AS n FROM receipt_file WHERE file_name = ?",
            &[SqlValue::from(file_name)],
        )
        .await?;
    count_column(row)
}

pub(crate) fn count_column(row: Option<sqlx::sqlite::SqliteRow>) -> Result<i64> {
    use sqlx::Row;
    match row {
        Some(row) => Ok(row.try_get("n")?),
        None => Ok(0),
    }
}
