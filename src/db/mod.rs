//! Analytics query execution
//!
//! Runs validated SQL against Postgres and decodes rows positionally into
//! JSON values. Only text that already passed the safety validator should
//! reach this module.

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;

/// Result set as positional rows plus column names
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryOutput {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Query-execution collaborator consumed by the pipeline.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryOutput>;
}

/// Postgres executor over a shared connection pool.
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from config with a server-side statement timeout, so a
    /// runaway query cannot hold a connection past the configured bound.
    pub async fn connect(config: &Config) -> Result<Self> {
        let timeout_ms = config.database.statement_timeout_secs * 1000;
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = {timeout_ms}"))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.database.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        debug!("Executing analytics query ({} chars)", sql.len());
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;

        let columns = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            None => Vec::new(),
        };

        let decoded = rows.iter().map(row_to_values).collect();
        Ok(QueryOutput {
            columns,
            rows: decoded,
        })
    }
}

/// Decode one row positionally by declared column type.
///
/// NUMERIC renders as a JSON number when it survives the round trip through
/// f64, else as a string so no precision is silently lost. Types outside the
/// ladder decode to null rather than failing the whole result set.
fn row_to_values(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .map(|column| {
            let idx = column.ordinal();
            let type_name = column.type_info().name();
            match type_name {
                "INT2" => row
                    .try_get::<Option<i16>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|i| Value::Number(i.into())),
                "INT4" => row
                    .try_get::<Option<i32>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|i| Value::Number(i.into())),
                "INT8" => row
                    .try_get::<Option<i64>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|i| Value::Number(i.into())),
                "FLOAT4" => row
                    .try_get::<Option<f32>, _>(idx)
                    .ok()
                    .flatten()
                    .and_then(|f| serde_json::Number::from_f64(f as f64))
                    .map(Value::Number),
                "FLOAT8" => row
                    .try_get::<Option<f64>, _>(idx)
                    .ok()
                    .flatten()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number),
                "NUMERIC" => row
                    .try_get::<Option<rust_decimal::Decimal>, _>(idx)
                    .ok()
                    .flatten()
                    .map(decimal_to_json),
                "BOOL" => row
                    .try_get::<Option<bool>, _>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Bool),
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
                    .try_get::<Option<String>, _>(idx)
                    .ok()
                    .flatten()
                    .map(Value::String),
                "UUID" => row
                    .try_get::<Option<uuid::Uuid>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|u| Value::String(u.to_string())),
                "JSONB" | "JSON" => row.try_get::<Option<Value>, _>(idx).ok().flatten(),
                "TIMESTAMPTZ" => row
                    .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|dt| Value::String(dt.to_rfc3339())),
                "TIMESTAMP" => row
                    .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|dt| Value::String(dt.to_string())),
                "DATE" => row
                    .try_get::<Option<chrono::NaiveDate>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|d| Value::String(d.to_string())),
                _ => None,
            }
            .unwrap_or(Value::Null)
        })
        .collect()
}

fn decimal_to_json(decimal: rust_decimal::Decimal) -> Value {
    if let Some(f) = decimal.to_f64() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            let parsed: Option<rust_decimal::Decimal> = num.to_string().parse().ok();
            if parsed == Some(decimal.normalize()) {
                return Value::Number(num);
            }
        }
    }
    Value::String(decimal.to_string())
}
