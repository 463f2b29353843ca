//! Stage Trait: single contract for every processing step
use crate::context::ExecutionContext;
use crate::table::TableSet;

/// One processing step over the named tables of a report.
pub trait Stage: Send + Sync {
    /// Stage id, e.g. `filter.sales`.
    fn id(&self) -> String;

    /// Tables the stage reads.
    fn inputs(&self) -> Vec<String>;

    /// Table the stage writes.
    fn output(&self) -> String;

    /// Whether the stage output depends only on its input (default: true)
    fn deterministic(&self) -> bool {
        true
    }

    /// Run the stage, rewriting `tables` in place.
    fn run(&self, tables: &mut TableSet, ctx: &ExecutionContext) -> Result<(), StageError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageError {
    MissingTable(String),
    MissingColumn { table: String, column: String },
    ValidationFailed(String),
    ExecutionFailed(String),
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::MissingTable(table) => write!(f, "STAGE/TABLE: no table named '{}'", table),
            Self::MissingColumn { table, column } => {
                write!(f, "STAGE/COLUMN: table '{}' has no column '{}'", table, column)
            }
            Self::ValidationFailed(msg) => write!(f, "STAGE/VALIDATION: {}", msg),
            Self::ExecutionFailed(msg) => write!(f, "STAGE/EXEC: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}
