//! Transaction-handle abstraction the committer works against.

use async_trait::async_trait;

use crate::domain::SqlValue;
use crate::error::StoreError;

/// One result row, columns in select order.
pub type Row = Vec<SqlValue>;

/// An open serializable transaction.
///
/// Parameters are positional (`$1`, `$2`, ...) in the order given.
#[async_trait]
pub trait TxHandle: Send {
    /// Exactly one row; the first if the query yields several.
    async fn get(&mut self, sql: &str, params: &[SqlValue]) -> Result<Row, StoreError>;

    async fn select(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError>;

    /// Returns the number of affected rows.
    async fn exec(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError>;

    /// `SELECT EXISTS (SELECT 1 <from_where>)`.
    async fn exists(&mut self, from_where: &str, params: &[SqlValue]) -> Result<bool, StoreError> {
        let sql = format!("SELECT EXISTS (SELECT 1 {})", from_where.trim());
        let row = self.get(&sql, params).await?;
        Ok(row.first().and_then(SqlValue::as_bool).unwrap_or(false))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Source of transactions.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Begins a transaction at serializable isolation.
    async fn begin(&self) -> Result<Box<dyn TxHandle>, StoreError>;
}
