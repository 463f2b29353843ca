//! Data Model: ReportRequest, SourceConfig, Artifact
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ReportError;
use crate::table::{Table, TableSchema, Violation};

/// Opaque identifier assigned to every accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(Uuid);

impl ReportId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpt_{}", self.0.simple())
    }
}

impl FromStr for ReportId {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("rpt_").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| ReportError::config(format!("invalid report id '{}': {}", s, e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "art_{}", self.0.simple())
    }
}

/// Template by library name or inline content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateRef {
    Name(String),
    Inline(String),
}

impl TemplateRef {
    /// Short description for logs and metadata. Inline bodies are not echoed.
    pub fn describe(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Inline(body) => format!("inline:{}", &blake3::hash(body.as_bytes()).to_hex()[..12]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pdf,
    Excel,
    Html,
    Json,
}

impl OutputFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Excel => "xlsx",
            Self::Html => "html",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pdf => "pdf",
            Self::Excel => "excel",
            Self::Html => "html",
            Self::Json => "json",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "excel" | "xlsx" => Ok(Self::Excel),
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            other => Err(ReportError::config(format!(
                "invalid output format '{}', must be one of pdf, excel, html, json",
                other
            ))),
        }
    }
}

// ============================================================================
// Sources
// ============================================================================

/// One declared source. `name` keys the fetched table in the merged set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// A failed required source fails the whole request.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Overrides the engine cache TTL; `0` disables caching for this source.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

fn default_required() -> bool {
    true
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            required: true,
            cache_ttl_secs: None,
            kind,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            SourceKind::Database(_) => "database",
            SourceKind::Api(_) => "api",
            SourceKind::File(_) => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Database(DatabaseConfig),
    Api(ApiConfig),
    File(FileConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub query: String,
    /// Positional bind values. Never spliced into the SQL text.
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// JSON body for POST requests.
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Json,
    Excel,
}

impl FileFormat {
    pub fn from_extension(path: &std::path::Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "xlsx" | "xls" | "xlsm" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("csv"),
            Self::Json => f.write_str("json"),
            Self::Excel => f.write_str("excel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    pub path: PathBuf,
    /// Inferred from the extension when absent.
    #[serde(default)]
    pub format: Option<FileFormat>,
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: None,
            delimiter: None,
            encoding: None,
            sheet: None,
        }
    }

    pub fn resolved_format(&self) -> Option<FileFormat> {
        self.format.or_else(|| FileFormat::from_extension(&self.path))
    }
}

/// Outcome of fetching one declared source.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub source_name: String,
    pub required: bool,
    pub outcome: Result<std::sync::Arc<Table>, ReportError>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

// ============================================================================
// Transform rules
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    In,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub column: String,
    pub function: AggregateFunction,
    /// Output column name; defaults to `<function>_<column>`.
    #[serde(default)]
    pub alias: Option<String>,
}

impl Aggregation {
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.function, self.column))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

/// Declarative processing step, applied in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformRule {
    Filter {
        table: String,
        column: String,
        operator: FilterOperator,
        #[serde(default)]
        value: Value,
    },
    Select {
        table: String,
        columns: Vec<String>,
    },
    Sort {
        table: String,
        by: String,
        #[serde(default)]
        descending: bool,
    },
    Limit {
        table: String,
        count: usize,
    },
    Aggregate {
        table: String,
        #[serde(default)]
        group_by: Vec<String>,
        aggregations: Vec<Aggregation>,
        /// Output table; replaces the input when absent.
        #[serde(default)]
        into: Option<String>,
    },
    Join {
        left: String,
        right: String,
        left_on: String,
        right_on: String,
        #[serde(default)]
        kind: JoinKind,
        into: String,
    },
}

impl TransformRule {
    /// Tables this rule reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            Self::Filter { table, .. }
            | Self::Select { table, .. }
            | Self::Sort { table, .. }
            | Self::Limit { table, .. }
            | Self::Aggregate { table, .. } => vec![table.as_str()],
            Self::Join { left, right, .. } => vec![left.as_str(), right.as_str()],
        }
    }

    /// Table this rule writes.
    pub fn output(&self) -> &str {
        match self {
            Self::Filter { table, .. }
            | Self::Select { table, .. }
            | Self::Sort { table, .. }
            | Self::Limit { table, .. } => table,
            Self::Aggregate { table, into, .. } => into.as_deref().unwrap_or(table),
            Self::Join { into, .. } => into,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Filter { .. } => "filter",
            Self::Select { .. } => "select",
            Self::Sort { .. } => "sort",
            Self::Limit { .. } => "limit",
            Self::Aggregate { .. } => "aggregate",
            Self::Join { .. } => "join",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Any violation fails the request.
    #[default]
    Fatal,
    /// Violations are attached to the artifact as warnings.
    Warn,
}

// ============================================================================
// Delivery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliverySink {
    Email {
        to: Vec<String>,
        subject: String,
        #[serde(default)]
        body: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    ObjectStore {
        bucket: String,
        #[serde(default)]
        key: Option<String>,
    },
}

impl DeliverySink {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Email { .. } => "email",
            Self::Webhook { .. } => "webhook",
            Self::ObjectStore { .. } => "object_store",
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// Immutable description of one report run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// `{name: ..}` or `{inline: ..}` in both JSON and YAML.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub template: TemplateRef,
    pub sources: Vec<SourceConfig>,
    pub output_format: OutputFormat,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub transforms: Vec<TransformRule>,
    #[serde(default)]
    pub schemas: BTreeMap<String, TableSchema>,
    #[serde(default)]
    pub validation_policy: ValidationPolicy,
    #[serde(default)]
    pub delivery: Option<DeliverySink>,
    /// Overrides the engine's overall request timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ReportRequest {
    pub fn new(template: TemplateRef, output_format: OutputFormat) -> Self {
        Self {
            template,
            sources: Vec::new(),
            output_format,
            parameters: Map::new(),
            transforms: Vec::new(),
            schemas: BTreeMap::new(),
            validation_policy: ValidationPolicy::default(),
            delivery: None,
            timeout_ms: None,
        }
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_transform(mut self, rule: TransformRule) -> Self {
        self.transforms.push(rule);
        self
    }

    pub fn with_schema(mut self, table: impl Into<String>, schema: TableSchema) -> Self {
        self.schemas.insert(table.into(), schema);
        self
    }

    pub fn with_delivery(mut self, sink: DeliverySink) -> Self {
        self.delivery = Some(sink);
        self
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Parse a request from JSON or YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ReportError> {
        serde_yaml::from_str(text)
            .map_err(|e| ReportError::config(format!("invalid report request: {}", e)))
    }
}

// ============================================================================
// Artifact
// ============================================================================

/// Lineage of one processing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub id: String,
    pub in_hash: String,
    pub out_hash: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub generated_at: DateTime<Utc>,
    pub template: String,
    pub sources_used: Vec<String>,
    pub sources_missing: Vec<String>,
    pub size_bytes: usize,
    pub content_hash: String,
    pub mime: String,
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Rendered report. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub report_id: ReportId,
    pub format: OutputFormat,
    pub content: Vec<u8>,
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef {
            id: self.id,
            format: self.format,
            size_bytes: self.metadata.size_bytes,
            content_hash: self.metadata.content_hash.clone(),
        }
    }

    /// Default file name, `<report id>.<ext>`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.report_id, self.format.extension())
    }
}

/// Pointer to an artifact held by an external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: ArtifactId,
    pub format: OutputFormat,
    pub size_bytes: usize,
    pub content_hash: String,
}

/// `blake3:<hex>` digest of raw bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data))
}
