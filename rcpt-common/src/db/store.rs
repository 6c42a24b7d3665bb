//! Storage primitives over the relational store
//!
//! Three operations cover every statement the service issues:
//! `execute` (returns the affected row id and change count), `fetch_one`
//! and `fetch_all`. Statements that must be atomic go through
//! [`Store::begin`].

use crate::Result;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

/// Value bound to a `?` placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Outcome of a mutating statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Row id of the last inserted row (SQLite `last_insert_rowid`)
    pub last_insert_id: i64,
    /// Number of rows changed by the statement
    pub rows_changed: u64,
}

/// Explicitly constructed storage handle; clone is cheap (pool handle)
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run a mutating statement
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecOutcome> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        Ok(ExecOutcome {
            last_insert_id: result.last_insert_rowid(),
            rows_changed: result.rows_affected(),
        })
    }

    /// Fetch at most one row
    pub async fn fetch_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<SqliteRow>> {
        let row = bind_params(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Fetch every matching row
    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqliteRow>> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Open an explicit transaction
    pub async fn begin(&self) -> Result<StoreTransaction> {
        let tx = self.pool.begin().await?;
        Ok(StoreTransaction { tx })
    }
}

/// Transaction handle offering the same primitives as [`Store`]
///
/// Dropping it without `commit` rolls back.
pub struct StoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTransaction {
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<ExecOutcome> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await?;
        Ok(ExecOutcome {
            last_insert_id: result.last_insert_rowid(),
            rows_changed: result.rows_affected(),
        })
    }

    pub async fn fetch_one(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<SqliteRow>> {
        let row = bind_params(sqlx::query(sql), params)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Roll back; the rollback's own failure is logged, never returned
    pub async fn rollback(self) {
        match self.tx.rollback().await {
            Ok(()) => debug!("Transaction rolled back"),
            Err(e) => warn!(error = %e, "Transaction rollback failed"),
        }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Bool(v) => query.bind(*v),
        };
    }
    query
}
