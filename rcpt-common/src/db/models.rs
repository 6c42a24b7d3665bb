//! Database models

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// One row per uploaded artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Declared (original) file name as uploaded
    pub file_name: String,
    /// Where the physical bytes currently reside
    pub file_path: String,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub is_processed: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRecord {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            file_name: row.try_get("file_name")?,
            file_path: row.try_get("file_path")?,
            is_valid: row.try_get("is_valid")?,
            invalid_reason: row.try_get("invalid_reason")?,
            is_processed: row.try_get("is_processed")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Quantity of a line item: a number, or "N/A" when the receipt gave none
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Count(serde_json::Number),
    Unknown(String),
}

impl Quantity {
    pub const NOT_AVAILABLE: &'static str = "N/A";

    pub fn not_available() -> Self {
        Quantity::Unknown(Self::NOT_AVAILABLE.to_string())
    }
}

/// Receipt line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub name: String,
    pub unit_price: Option<f64>,
    pub quantity: Quantity,
}

/// Structured extraction result for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub id: i64,
    pub receipt_file_id: i64,
    pub purchased_at: Option<String>,
    pub merchant_name: Option<String>,
    pub total_amount: Option<f64>,
    pub category: Option<String>,
    pub items: Vec<ReceiptItem>,
    /// Final path of the file at the time of the last successful extraction
    pub file_path: String,
    /// Verbatim adapter output, kept for audit
    pub raw_extracted_text: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ReceiptRecord {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let items_json: String = row.try_get("items")?;
        let items: Vec<ReceiptItem> = serde_json::from_str(&items_json).map_err(|e| {
            Error::Internal(format!("Corrupt items column: {}", e))
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            receipt_file_id: row.try_get("receipt_file_id")?,
            purchased_at: row.try_get("purchased_at")?,
            merchant_name: row.try_get("merchant_name")?,
            total_amount: row.try_get("total_amount")?,
            category: row.try_get("category")?,
            items,
            file_path: row.try_get("file_path")?,
            raw_extracted_text: row.try_get("raw_extracted_text")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Receipt joined with the name of its owning file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptWithFile {
    #[serde(flatten)]
    pub receipt: ReceiptRecord,
    pub original_file_name: String,
}

impl ReceiptWithFile {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            receipt: ReceiptRecord::from_row(row)?,
            original_file_name: row.try_get("original_file_name")?,
        })
    }
}
