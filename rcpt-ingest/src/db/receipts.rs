//! receipt table operations

use rcpt_common::db::{ReceiptRecord, ReceiptWithFile, SqlValue, Store, StoreTransaction};
use rcpt_common::time::db_timestamp;
use rcpt_common::{Error, Result};
use sqlx::Row;

use super::files::count_column;
use crate::services::extraction::ExtractedReceipt;

const RECEIPT_COLUMNS: &str = "r.id, r.receipt_file_id, r.purchased_at, r.merchant_name, \
     r.total_amount, r.category, r.items, r.file_path, r.raw_extracted_text, \
     r.created_at, r.updated_at";

/// Insert the receipt for `file_id`, or update every extracted field in place
///
/// Returns the receipt id and whether a new row was created.
pub async fn upsert_receipt(
    tx: &mut StoreTransaction,
    file_id: i64,
    receipt: &ExtractedReceipt,
    final_path: &str,
) -> Result<(i64, bool)> {
    let items = serde_json::to_string(&receipt.items)
        .map_err(|e| Error::Internal(format!("Failed to encode items: {}", e)))?;
    let now = db_timestamp();

    let existing = tx
        .fetch_one(
            "SELECT id FROM receipt WHERE receipt_file_id = ?",
            &[file_id.into()],
        )
        .await?;

    match existing {
        Some(row) => {
            let receipt_id: i64 = row.try_get("id")?;
            tx.execute(
                r#"
                UPDATE receipt
                SET purchased_at = ?, merchant_name = ?, total_amount = ?, category = ?,
                    items = ?, file_path = ?, raw_extracted_text = ?, updated_at = ?
                WHERE id = ?
                "#,
                &[
                    receipt.purchased_at.as_deref().into(),
                    receipt.merchant_name.as_deref().into(),
                    receipt.total_amount.into(),
                    receipt.category.as_deref().into(),
                    items.into(),
                    final_path.into(),
                    receipt.raw_text.as_str().into(),
                    now.into(),
                    receipt_id.into(),
                ],
            )
            .await?;
            Ok((receipt_id, false))
        }
        None => {
            let outcome = tx
                .execute(
                    r#"
                    INSERT INTO receipt (receipt_file_id, purchased_at, merchant_name, total_amount, category,
                                         items, file_path, raw_extracted_text, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    &[
                        file_id.into(),
                        receipt.purchased_at.as_deref().into(),
                        receipt.merchant_name.as_deref().into(),
                        receipt.total_amount.into(),
                        receipt.category.as_deref().into(),
                        items.into(),
                        final_path.into(),
                        receipt.raw_text.as_str().into(),
                        (&now).into(),
                        now.into(),
                    ],
                )
                .await?;
            Ok((outcome.last_insert_id, true))
        }
    }
}

pub async fn load_receipt(store: &Store, id: i64) -> Result<Option<ReceiptRecord>> {
    let sql = format!("SELECT {} FROM receipt r WHERE r.id = ?", RECEIPT_COLUMNS);
    store
        .fetch_one(&sql, &[id.into()])
        .await?
        .map(|row| ReceiptRecord::from_row(&row))
        .transpose()
}

/// Single receipt joined with its owning file's name
pub async fn load_receipt_with_file(store: &Store, id: i64) -> Result<Option<ReceiptWithFile>> {
    let sql = format!(
        "SELECT {}, rf.file_name AS original_file_name \
         FROM receipt r JOIN receipt_file rf ON rf.id = r.receipt_file_id \
         WHERE r.id = ?",
        RECEIPT_COLUMNS
    );
    store
        .fetch_one(&sql, &[id.into()])
        .await?
        .map(|row| ReceiptWithFile::from_row(&row))
        .transpose()
}

/// All receipts, most recent purchase first
pub async fn list_receipts(store: &Store) -> Result<Vec<ReceiptWithFile>> {
    let sql = format!(
        "SELECT {}, rf.file_name AS original_file_name \
         FROM receipt r JOIN receipt_file rf ON rf.id = r.receipt_file_id \
         ORDER BY r.purchased_at DESC, r.created_at DESC, r.id DESC",
        RECEIPT_COLUMNS
    );
    store
        .fetch_all(&sql, &[])
        .await?
        .iter()
        .map(ReceiptWithFile::from_row)
        .collect()
}

pub async fn count_receipts_for_file(store: &Store, file_id: i64) -> Result<i64> {
    let row = store
        .fetch_one(
            "SELECT COUNT(*) AS n FROM receipt WHERE receipt_file_id = ?",
            &[SqlValue::from(file_id)],
        )
        .await?;
    count_column(row)
}

/// Remove a receipt and its owning file record together
///
/// Both rows go or neither does; an unknown receipt id rolls back before the
/// file row is touched.
pub async fn delete_receipt_and_file(store: &Store, receipt_id: i64, file_id: i64) -> Result<()> {
    let mut tx = store.begin().await?;
    match delete_both(&mut tx, receipt_id, file_id).await {
        Ok(()) => tx.commit().await,
        Err(e) => {
            tx.rollback().await;
            Err(e)
        }
    }
}

async fn delete_both(tx: &mut StoreTransaction, receipt_id: i64, file_id: i64) -> Result<()> {
    let removed = tx
        .execute("DELETE FROM receipt WHERE id = ?", &[SqlValue::from(receipt_id)])
        .await?;
    if removed.rows_changed == 0 {
        return Err(Error::NotFound(format!("Receipt {} not found", receipt_id)));
    }

    tx.execute("DELETE FROM receipt_file WHERE id = ?", &[SqlValue::from(file_id)])
        .await?;
    Ok(())
}
