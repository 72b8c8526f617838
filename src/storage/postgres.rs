//! PostgreSQL datastore backed by sqlx.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, Transaction, TypeInfo};
use tracing::debug;

use super::datastore::{Datastore, Row, TxHandle};
use crate::domain::SqlValue;
use crate::error::StoreError;

/// Migrations shipped with the crate (`ON DELETE CASCADE` on every `ref_id`).
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::sqlx("connect", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::sqlx("migrate", sqlx::Error::Migrate(Box::new(e))))
    }

    /// Lists the tables among `tables` whose `ref_id` foreign key does not
    /// cascade on delete. The update path relies on these cascades to
    /// remove grandchildren of replaced rows.
    pub async fn missing_cascades(&self, tables: &[String]) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT tc.table_name::text AS table_name
             FROM information_schema.table_constraints tc
             JOIN information_schema.key_column_usage kcu
               ON tc.constraint_name = kcu.constraint_name
              AND tc.table_schema = kcu.table_schema
             JOIN information_schema.referential_constraints rc
               ON rc.constraint_name = tc.constraint_name
              AND rc.constraint_schema = tc.table_schema
             WHERE tc.constraint_type = 'FOREIGN KEY'
               AND kcu.column_name = 'ref_id'
               AND rc.delete_rule <> 'CASCADE'
               AND tc.table_name = ANY($1)
             ORDER BY 1",
        )
        .bind(tables)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::sqlx("cascade check", e))?;

        rows.iter()
            .map(|r| {
                r.try_get::<String, _>("table_name").map_err(|e| StoreError::Decode {
                    column: "table_name".into(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn begin(&self) -> Result<Box<dyn TxHandle>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::sqlx("begin", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::sqlx("set isolation", e))?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn bind_all<'q>(sql: &'q str, params: &'q [SqlValue]) -> Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = match p {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Int(n) => query.bind(*n),
            SqlValue::Float(n) => query.bind(*n),
            SqlValue::Bool(b) => query.bind(*b),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Row, StoreError> {
    let mut out = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        let fail = |e: sqlx::Error| StoreError::Decode {
            column: col.name().to_string(),
            reason: e.to_string(),
        };
        let value = match col.type_info().name() {
            "INT8" => row.try_get::<Option<i64>, _>(i).map_err(fail)?.into(),
            "INT4" => row.try_get::<Option<i32>, _>(i).map_err(fail)?.map(i64::from).into(),
            "INT2" => row.try_get::<Option<i16>, _>(i).map_err(fail)?.map(i64::from).into(),
            "FLOAT8" => row.try_get::<Option<f64>, _>(i).map_err(fail)?.into(),
            "FLOAT4" => row.try_get::<Option<f32>, _>(i).map_err(fail)?.map(f64::from).into(),
            "BOOL" => row.try_get::<Option<bool>, _>(i).map_err(fail)?.into(),
            _ => row.try_get::<Option<String>, _>(i).map_err(fail)?.into(),
        };
        out.push(value);
    }
    Ok(out)
}

#[async_trait]
impl TxHandle for PgTx {
    async fn get(&mut self, sql: &str, params: &[SqlValue]) -> Result<Row, StoreError> {
        debug!(sql, params = params.len(), "get");
        let row = bind_all(sql, params)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| StoreError::sqlx(sql, e))?
            .ok_or_else(|| StoreError::NoRow(sql.to_string()))?;
        decode_row(&row)
    }

    async fn select(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
        debug!(sql, params = params.len(), "select");
        let rows = bind_all(sql, params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| StoreError::sqlx(sql, e))?;
        rows.iter().map(decode_row).collect()
    }

    async fn exec(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, StoreError> {
        debug!(sql, params = params.len(), "exec");
        let done = bind_all(sql, params)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StoreError::sqlx(sql, e))?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| StoreError::sqlx("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| StoreError::sqlx("rollback", e))
    }
}
