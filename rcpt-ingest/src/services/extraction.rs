//! Extraction adapter
//!
//! Wraps the external AI call behind [`ReceiptExtractor`] and turns whatever
//! text the model produced into a strict [`ModelOutput`] before any field is
//! trusted: code fences are stripped, the JSON is parsed, and every field is
//! coerced to the shape the receipt table stores.

use async_trait::async_trait;
use rcpt_common::db::{Quantity, ReceiptItem};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::path::Path;
use thiserror::Error;

/// Fixed instruction sent with every receipt
pub const EXTRACTION_PROMPT: &str = r#"Extract vendor, date (yyyy-MM-dd HH:mm:ss format), total, a one-word spending category and item details from this receipt. Respond with only a JSON object in this format:
{
    "merchant_name": "Example Store",
    "purchased_at": "2023-10-26 14:30:00",
    "total_amount": 123.45,
    "category": "Groceries",
    "items": [
        {"name": "Coffee", "price": 4.50, "quantity": 1}
    ]
}"#;

/// Why an extraction produced no usable receipt
#[derive(Debug, Clone, Error)]
pub enum ExtractionFailure {
    /// Empty or non-JSON model output; the raw text is kept for diagnostics
    #[error("AI response was not valid JSON or empty: {reason}")]
    Parse { reason: String, raw_text: String },

    #[error("AI processing failed due to rate limiting or quota issues: {0}")]
    RateLimited(String),

    /// Upstream content-safety block with the provider's feedback payload
    #[error("AI response blocked by content safety filter: {feedback}")]
    SafetyBlocked { feedback: Value },

    /// Any other transport or service error
    #[error("AI service error: {0}")]
    Adapter(String),
}

impl ExtractionFailure {
    /// Raw model text, when the failure happened after a response arrived
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            ExtractionFailure::Parse { raw_text, .. } => Some(raw_text),
            _ => None,
        }
    }

    /// Short machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionFailure::Parse { .. } => "PARSE_FAILURE",
            ExtractionFailure::RateLimited(_) => "RATE_LIMITED",
            ExtractionFailure::SafetyBlocked { .. } => "SAFETY_BLOCKED",
            ExtractionFailure::Adapter(_) => "ADAPTER_ERROR",
        }
    }
}

/// Normalized receipt fields from one successful extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedReceipt {
    pub merchant_name: Option<String>,
    /// `YYYY-MM-DD HH:MM:SS` when the model gave a date
    pub purchased_at: Option<String>,
    pub total_amount: Option<f64>,
    /// Lowercased single token
    pub category: Option<String>,
    pub items: Vec<ReceiptItem>,
    /// Verbatim model output
    #[serde(skip)]
    pub raw_text: String,
}

impl ExtractedReceipt {
    /// Four-digit purchase year, when `purchased_at` starts with one
    pub fn purchase_year(&self) -> Option<String> {
        let year = self.purchased_at.as_deref()?.get(0..4)?;
        let value: i32 = year.parse().ok()?;
        (1900..=2999).contains(&value).then(|| year.to_string())
    }
}

/// Model output after validation: either every field has been coerced, or the
/// text is unusable and only kept for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    WellFormed(ExtractedReceipt),
    Malformed { raw_text: String, reason: String },
}

impl ModelOutput {
    pub fn into_result(self) -> Result<ExtractedReceipt, ExtractionFailure> {
        match self {
            ModelOutput::WellFormed(receipt) => Ok(receipt),
            ModelOutput::Malformed { raw_text, reason } => {
                Err(ExtractionFailure::Parse { reason, raw_text })
            }
        }
    }
}

/// Source of structured receipt data for a stored PDF
#[async_trait]
pub trait ReceiptExtractor: Send + Sync {
    /// Extractor name for logging
    fn name(&self) -> &'static str;

    /// Extract receipt fields from the file at `file_path`
    ///
    /// Single attempt; retries are the caller's business.
    async fn extract(&self, file_path: &Path) -> Result<ExtractedReceipt, ExtractionFailure>;
}

/// Remove a surrounding markdown code fence (with optional language tag)
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            // Single-line fence such as ```json {...}```
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Validate and coerce raw model text
pub fn parse_model_output(raw: &str) -> ModelOutput {
    let malformed = |reason: String| ModelOutput::Malformed {
        raw_text: raw.to_string(),
        reason,
    };

    let cleaned = strip_code_fence(raw);
    if cleaned.is_empty() {
        return malformed("AI returned an empty response".to_string());
    }

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(e) => return malformed(format!("invalid JSON: {}", e)),
    };
    let Value::Object(fields) = value else {
        return malformed("expected a JSON object".to_string());
    };

    ModelOutput::WellFormed(ExtractedReceipt {
        merchant_name: fields.get("merchant_name").and_then(coerce_string),
        purchased_at: fields
            .get("purchased_at")
            .and_then(coerce_string)
            .map(|s| normalize_purchased_at(&s)),
        total_amount: fields.get("total_amount").and_then(coerce_number),
        category: fields
            .get("category")
            .and_then(Value::as_str)
            .and_then(normalize_category),
        items: coerce_items(fields.get("items")),
        raw_text: raw.to_string(),
    })
}

/// Lowercase, trim and join words with `_`; keeps only `[a-z0-9_-]`
pub fn normalize_category(raw: &str) -> Option<String> {
    let joined = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase();
    let token: String = joined
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    (!token.is_empty()).then_some(token)
}

/// Append ` 00:00:00` to a value that carries a date but no time of day
///
/// Any value with a digit and no `:` counts as date-only, whatever its date
/// layout (`2023-10-26`, `2023/10/26`, `26.10.2023`). Text without digits is
/// left alone.
pub fn normalize_purchased_at(raw: &str) -> String {
    let trimmed = raw.trim();
    let has_date = trimmed.chars().any(|c| c.is_ascii_digit());
    if has_date && !trimmed.contains(':') {
        format!("{} 00:00:00", trimmed)
    } else {
        trimmed.to_string()
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers pass through, numeric strings are parsed, anything else is null
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn coerce_quantity(value: Option<&Value>) -> Quantity {
    match value {
        Some(Value::Number(n)) => Quantity::Count(n.clone()),
        Some(Value::String(s)) => {
            let s = s.trim();
            if let Ok(whole) = s.parse::<i64>() {
                Quantity::Count(whole.into())
            } else {
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Quantity::Count)
                    .unwrap_or_else(Quantity::not_available)
            }
        }
        _ => Quantity::not_available(),
    }
}

fn coerce_item(value: &Value) -> ReceiptItem {
    let empty = Map::new();
    let (fields, bare_name) = match value {
        Value::Object(fields) => (fields, None),
        Value::String(name) => (&empty, Some(name.trim().to_string()).filter(|s| !s.is_empty())),
        _ => (&empty, None),
    };

    ReceiptItem {
        name: fields
            .get("name")
            .and_then(coerce_string)
            .or(bare_name)
            .unwrap_or_else(|| Quantity::NOT_AVAILABLE.to_string()),
        unit_price: fields
            .get("unit_price")
            .or_else(|| fields.get("price"))
            .and_then(coerce_number),
        quantity: coerce_quantity(fields.get("quantity")),
    }
}

fn coerce_items(value: Option<&Value>) -> Vec<ReceiptItem> {
    match value {
        Some(Value::Array(items)) => items.iter().map(coerce_item).collect(),
        _ => Vec::new(),
    }
}
