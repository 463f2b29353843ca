//! Unified Error Model
//!
//! Every component surfaces exactly one of these kinds. The display form
//! follows `KIND/detail` so logs and adapters can branch on the prefix.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::table::Violation;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportError {
    #[error("CONFIG/{message}")]
    Configuration { message: String },

    #[error("SOURCE/{source_name}/{fetch_kind}: {message}")]
    DataSource {
        source_name: String,
        fetch_kind: FetchErrorKind,
        message: String,
    },

    #[error("PROCESS/{stage}: {message}")]
    Processing {
        stage: String,
        message: String,
        #[serde(default)]
        violations: Vec<Violation>,
    },

    #[error("TEMPLATE/{message}")]
    Template { message: String },

    #[error("RENDER/{format}: {message}")]
    Render { format: String, message: String },

    #[error("DELIVERY/{sink}: {message}")]
    Delivery {
        sink: String,
        message: String,
        transient: bool,
    },

    #[error("TIMEOUT/{message}")]
    Timeout { message: String },
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Machine-readable error tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    DataSource,
    Processing,
    Template,
    Render,
    Delivery,
    Timeout,
}

/// Component that raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Engine,
    DataSource,
    Processor,
    Renderer,
    Delivery,
}

/// Sub-kind of a fetch failure. Only the transient ones are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Connection,
    Timeout,
    ServerError,
    RateLimited,
    ClientError,
    Auth,
    Query,
    Parse,
    NotFound,
}

impl FetchErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Timeout | Self::ServerError | Self::RateLimited
        )
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::RateLimited => "rate_limited",
            Self::ClientError => "client_error",
            Self::Auth => "auth",
            Self::Query => "query",
            Self::Parse => "parse",
            Self::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::DataSource => "data_source",
            Self::Processing => "processing",
            Self::Template => "template",
            Self::Render => "render",
            Self::Delivery => "delivery",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

impl ReportError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn fetch(
        source_name: impl Into<String>,
        fetch_kind: FetchErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::DataSource {
            source_name: source_name.into(),
            fetch_kind,
            message: message.into(),
        }
    }

    pub fn processing(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processing {
            stage: stage.into(),
            message: message.into(),
            violations: Vec::new(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    pub fn render(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn delivery(sink: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        Self::Delivery {
            sink: sink.into(),
            message: message.into(),
            transient,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::DataSource { .. } => ErrorKind::DataSource,
            Self::Processing { .. } => ErrorKind::Processing,
            Self::Template { .. } => ErrorKind::Template,
            Self::Render { .. } => ErrorKind::Render,
            Self::Delivery { .. } => ErrorKind::Delivery,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    pub fn component(&self) -> Component {
        match self {
            Self::Configuration { .. } | Self::Timeout { .. } => Component::Engine,
            Self::DataSource { .. } => Component::DataSource,
            Self::Processing { .. } => Component::Processor,
            Self::Template { .. } | Self::Render { .. } => Component::Renderer,
            Self::Delivery { .. } => Component::Delivery,
        }
    }

    /// Whether a retry can change the outcome.
    ///
    /// Render failures count as transient; the engine caps them at
    /// `render_attempts`.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DataSource { fetch_kind, .. } => fetch_kind.is_transient(),
            Self::Render { .. } => true,
            Self::Delivery { transient, .. } => *transient,
            Self::Configuration { .. }
            | Self::Processing { .. }
            | Self::Template { .. }
            | Self::Timeout { .. } => false,
        }
    }

    /// Name of the failing source, for data source errors.
    pub fn source_name(&self) -> Option<&str> {
        match self {
            Self::DataSource { source_name, .. } => Some(source_name),
            _ => None,
        }
    }

    /// Re-tag a data source error with the logical source name.
    pub fn for_source(self, name: &str) -> Self {
        match self {
            Self::DataSource {
                fetch_kind,
                message,
                ..
            } => Self::DataSource {
                source_name: name.to_string(),
                fetch_kind,
                message,
            },
            other => other,
        }
    }
}
