//! SQL source over sqlx's `Any` driver.
//!
//! Caller values only ever reach the database as bound parameters.
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Column, Executor, Row, Statement, ValueRef};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use reportgen_core::validation::validate_single_statement;
use reportgen_core::{
    DatabaseConfig, FetchErrorKind, ReportError, Result, SourceConfig, SourceKind, Table,
};

use crate::DataSource;

static INSTALL_DRIVERS: Once = Once::new();

const SUPPORTED_SCHEMES: &[&str] = &["sqlite:", "postgres:", "postgresql:"];

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

/// Pools are shared per connection string for the lifetime of the source.
pub struct DatabaseSource {
    pools: DashMap<String, AnyPool>,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl DatabaseSource {
    pub fn new(max_connections: u32, acquire_timeout: Duration) -> Self {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        Self {
            pools: DashMap::new(),
            max_connections,
            acquire_timeout,
        }
    }

    pub fn validate(name: &str, config: &DatabaseConfig) -> Result<()> {
        let conn = config.connection_string.trim();
        if conn.is_empty() {
            return Err(ReportError::config(format!(
                "source '{}': connection string is empty",
                name
            )));
        }
        if !SUPPORTED_SCHEMES.iter().any(|s| conn.starts_with(s)) {
            return Err(ReportError::config(format!(
                "source '{}': unsupported connection string scheme, expected one of {}",
                name,
                SUPPORTED_SCHEMES.join(" ")
            )));
        }
        if config.query.trim().is_empty() {
            return Err(ReportError::config(format!("source '{}': query is empty", name)));
        }
        validate_single_statement(&config.query)
            .map_err(|e| ReportError::config(format!("source '{}': {}", name, e)))
    }

    async fn pool(&self, name: &str, connection_string: &str) -> Result<AnyPool> {
        if let Some(pool) = self.pools.get(connection_string) {
            return Ok(pool.clone());
        }
        let pool = AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(connection_string)
            .await
            .map_err(|e| map_sqlx_error(name, e))?;
        info!(source = %name, max_connections = self.max_connections, "database pool created");
        Ok(self
            .pools
            .entry(connection_string.to_string())
            .or_insert(pool)
            .clone())
    }

    fn config<'a>(config: &'a SourceConfig) -> Result<&'a DatabaseConfig> {
        match &config.kind {
            SourceKind::Database(db) => Ok(db),
            _ => Err(ReportError::config(format!(
                "source '{}' is not a database source",
                config.name
            ))),
        }
    }
}

#[async_trait]
impl DataSource for DatabaseSource {
    async fn fetch(&self, config: &SourceConfig) -> Result<Table> {
        let db = Self::config(config)?;
        Self::validate(&config.name, db)?;
        let pool = self.pool(&config.name, &db.connection_string).await?;

        let query = db
            .params
            .iter()
            .fold(sqlx::query::<Any>(&db.query), bind_param);
        let rows: Vec<AnyRow> = query
            .fetch_all(&pool)
            .await
            .map_err(|e| map_sqlx_error(&config.name, e))?;

        let names: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => pool
                .prepare(db.query.as_str())
                .await
                .map(|stmt| stmt.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default(),
        };

        let cells = rows
            .iter()
            .map(|row| (0..names.len()).map(|idx| decode_cell(row, idx)).collect())
            .collect();
        debug!(source = %config.name, rows = rows.len(), columns = names.len(), "query complete");
        Ok(Table::new(names, cells))
    }

    async fn test_connection(&self, config: &SourceConfig) -> Result<bool> {
        let db = Self::config(config)?;
        Self::validate(&config.name, db)?;
        let pool = match self.pool(&config.name, &db.connection_string).await {
            Ok(pool) => pool,
            Err(_) => return Ok(false),
        };
        Ok(sqlx::query::<Any>("SELECT 1").fetch_one(&pool).await.is_ok())
    }
}

fn bind_param<'q>(query: AnyQuery<'q>, value: &Value) -> AnyQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Cells decode through a fallback chain since `Any` exposes no static types.
fn decode_cell(row: &AnyRow, idx: usize) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Err(_) => return Value::Null,
        _ => {}
    }
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::String(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return Value::String(String::from_utf8_lossy(&v).into_owned());
    }
    Value::Null
}

fn map_sqlx_error(name: &str, err: sqlx::Error) -> ReportError {
    let kind = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => FetchErrorKind::Connection,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => FetchErrorKind::Parse,
        sqlx::Error::RowNotFound => FetchErrorKind::NotFound,
        _ => FetchErrorKind::Query,
    };
    ReportError::fetch(name, kind, err.to_string())
}
