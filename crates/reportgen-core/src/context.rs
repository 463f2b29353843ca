//! Execution Context: per-report state shared by the processing stages
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::data_model::ReportId;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub report_id: ReportId,
    pub trace_id: String,
    pub started_at: DateTime<Utc>,
    pub parameters: Map<String, Value>,
    /// Tables of optional sources that failed to fetch.
    pub missing_tables: Vec<String>,
}

impl ExecutionContext {
    pub fn new(report_id: ReportId, parameters: Map<String, Value>) -> Self {
        Self {
            report_id,
            trace_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            parameters,
            missing_tables: Vec::new(),
        }
    }

    pub fn is_missing(&self, table: &str) -> bool {
        self.missing_tables.iter().any(|t| t == table)
    }
}
