//! Report Generator Core: data model, tables, stages and the error contract
//!
//! Everything the sources, processor, renderer, delivery and engine crates
//! agree on lives here.

pub mod config;
pub mod context;
pub mod data_model;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod retry;
pub mod runner;
pub mod stage;
pub mod table;
pub mod validation;

pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use data_model::{
    hash_bytes, AggregateFunction, Aggregation, ApiConfig, Artifact, ArtifactId, ArtifactMetadata,
    ArtifactRef, DatabaseConfig, DeliverySink, FetchResult, FileConfig, FileFormat,
    FilterOperator, HttpMethod, JoinKind, OutputFormat, ReportId, ReportRequest, SourceConfig,
    SourceKind, StageRecord, TemplateRef, TransformRule, ValidationPolicy,
};
pub use error::{Component, ErrorKind, FetchErrorKind, ReportError, Result};
pub use fingerprint::Fingerprint;
pub use retry::RetryPolicy;
pub use runner::{PipelineOutput, PipelineRunner};
pub use stage::{Stage, StageError};
pub use table::{
    Column, ColumnSchema, ColumnType, Table, TableSchema, TableSet, Violation, ViolationKind,
};

/// Report generator version
pub const REPORTGEN_VERSION: &str = env!("CARGO_PKG_VERSION");
