//! Report Generator Sources: one `DataSource` contract over databases, HTTP
//! APIs and files.
//!
//! Concrete sources perform a single attempt. `SourceDispatcher` picks the
//! backend by exhaustive match on the source kind and owns validation, the
//! per-attempt timeout and the retry loop.

pub mod api;
pub mod database;
pub mod file;

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use reportgen_core::{
    EngineConfig, FetchErrorKind, ReportError, Result, RetryPolicy, SourceConfig, SourceKind, Table,
};

pub use api::ApiSource;
pub use database::DatabaseSource;
pub use file::FileSource;

/// Fetches one tabular result for a declared source.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, config: &SourceConfig) -> Result<Table>;

    /// Pre-flight check. `Ok(false)` means the source is unreachable;
    /// `Err` means the configuration itself is unusable.
    async fn test_connection(&self, config: &SourceConfig) -> Result<bool>;
}

/// Checks a source configuration without touching the network or disk.
pub fn validate_source(config: &SourceConfig) -> Result<()> {
    match &config.kind {
        SourceKind::Database(db) => DatabaseSource::validate(&config.name, db),
        SourceKind::Api(api) => ApiSource::validate(&config.name, api),
        SourceKind::File(file) => FileSource::validate(&config.name, file),
    }
}

pub struct SourceDispatcher {
    database: DatabaseSource,
    api: ApiSource,
    file: FileSource,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl SourceDispatcher {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            database: DatabaseSource::new(config.database_max_connections, config.fetch_timeout()),
            api: ApiSource::new(config.fetch_timeout())?,
            file: FileSource::new(),
            retry: config.retry.clone(),
            attempt_timeout: config.fetch_timeout(),
        })
    }

    fn backend(&self, kind: &SourceKind) -> &dyn DataSource {
        match kind {
            SourceKind::Database(_) => &self.database,
            SourceKind::Api(_) => &self.api,
            SourceKind::File(_) => &self.file,
        }
    }
}

#[async_trait]
impl DataSource for SourceDispatcher {
    async fn fetch(&self, config: &SourceConfig) -> Result<Table> {
        validate_source(config)?;
        let backend = self.backend(&config.kind);
        let timeout = self.attempt_timeout;

        let (result, attempts) = self
            .retry
            .run(&config.name, |attempt| async move {
                debug!(source = %config.name, kind = config.kind_name(), attempt = attempt, "fetch attempt");
                match tokio::time::timeout(timeout, backend.fetch(config)).await {
                    Ok(result) => result,
                    Err(_) => Err(ReportError::fetch(
                        &config.name,
                        FetchErrorKind::Timeout,
                        format!("no result within {}ms", timeout.as_millis()),
                    )),
                }
            })
            .await;

        match result {
            Ok(table) => {
                debug!(source = %config.name, attempts = attempts, rows = table.row_count(), "fetch succeeded");
                Ok(table)
            }
            Err(err) => Err(err.for_source(&config.name)),
        }
    }

    async fn test_connection(&self, config: &SourceConfig) -> Result<bool> {
        validate_source(config)?;
        let backend = self.backend(&config.kind);
        match tokio::time::timeout(self.attempt_timeout, backend.test_connection(config)).await {
            Ok(result) => result,
            Err(_) => Ok(false),
        }
    }
}

/// Map an HTTP status to a fetch error kind. `None` for success codes.
pub(crate) fn classify_status(status: u16) -> Option<FetchErrorKind> {
    match status {
        200..=299 => None,
        401 | 403 => Some(FetchErrorKind::Auth),
        404 => Some(FetchErrorKind::NotFound),
        408 => Some(FetchErrorKind::Timeout),
        429 => Some(FetchErrorKind::RateLimited),
        500..=599 => Some(FetchErrorKind::ServerError),
        _ => Some(FetchErrorKind::ClientError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportgen_core::{ApiConfig, FileConfig};

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(401), Some(FetchErrorKind::Auth));
        assert_eq!(classify_status(429), Some(FetchErrorKind::RateLimited));
        assert_eq!(classify_status(503), Some(FetchErrorKind::ServerError));
        assert_eq!(classify_status(422), Some(FetchErrorKind::ClientError));
        assert!(!FetchErrorKind::ClientError.is_transient());
    }

    #[test]
    fn test_validate_source_dispatches_by_kind() {
        let bad_api = SourceConfig::new(
            "metrics",
            SourceKind::Api(ApiConfig {
                url: "not a url".into(),
                method: Default::default(),
                auth_token: None,
                headers: Default::default(),
                params: Default::default(),
                body: None,
            }),
        );
        assert_eq!(
            validate_source(&bad_api).unwrap_err().kind(),
            reportgen_core::ErrorKind::Configuration
        );

        let csv = SourceConfig::new("sales", SourceKind::File(FileConfig::new("sales.csv")));
        assert!(validate_source(&csv).is_ok());
    }
}
