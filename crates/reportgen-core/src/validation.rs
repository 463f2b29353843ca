//! Structural request validation, run before any I/O.
//!
//! Source-specific checks (URL syntax, connection string scheme, file
//! existence) live with each source; this module covers what can be decided
//! from the request alone.
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::data_model::{DeliverySink, ReportRequest, SourceKind, TemplateRef};
use crate::error::{ReportError, Result};

/// Context keys the engine fills in itself.
pub const RESERVED_PARAMETERS: &[&str] = &["tables", "data", "report"];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static email regex")
});

pub fn validate_email(address: &str) -> Result<()> {
    if EMAIL_RE.is_match(address) {
        Ok(())
    } else {
        Err(ReportError::config(format!("invalid email address: {}", address)))
    }
}

/// Reject SQL text holding more than one statement. Quoted literals and
/// comments are skipped; a single trailing `;` is allowed.
pub fn validate_single_statement(query: &str) -> Result<()> {
    let mut chars = query.chars().peekable();
    let mut quote: Option<char> = None;
    let mut terminated = false;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '-' if chars.peek() == Some(&'-') => {
                for rest in chars.by_ref() {
                    if rest == '\n' {
                        break;
                    }
                }
            }
            ';' => terminated = true,
            c if terminated && !c.is_whitespace() => {
                return Err(ReportError::config(
                    "query must contain a single statement",
                ));
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(ReportError::config("query has an unterminated quoted literal"));
    }
    Ok(())
}

/// Everything checkable without touching a source.
pub fn validate_request(request: &ReportRequest) -> Result<()> {
    if request.sources.is_empty() {
        return Err(ReportError::config("report request declares no sources"));
    }

    match &request.template {
        TemplateRef::Name(name) if name.trim().is_empty() => {
            return Err(ReportError::config("template name is empty"));
        }
        TemplateRef::Inline(body) if body.trim().is_empty() => {
            return Err(ReportError::config("inline template is empty"));
        }
        _ => {}
    }

    let mut names = BTreeSet::new();
    for source in &request.sources {
        if source.name.trim().is_empty() {
            return Err(ReportError::config("source name is empty"));
        }
        if !names.insert(source.name.as_str()) {
            return Err(ReportError::config(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }
        match &source.kind {
            SourceKind::Database(db) => {
                if db.connection_string.trim().is_empty() {
                    return Err(ReportError::config(format!(
                        "source '{}': connection string is empty",
                        source.name
                    )));
                }
                if db.query.trim().is_empty() {
                    return Err(ReportError::config(format!(
                        "source '{}': query is empty",
                        source.name
                    )));
                }
            }
            SourceKind::Api(api) => {
                if api.url.trim().is_empty() {
                    return Err(ReportError::config(format!(
                        "source '{}': url is missing",
                        source.name
                    )));
                }
            }
            SourceKind::File(file) => {
                if file.path.as_os_str().is_empty() {
                    return Err(ReportError::config(format!(
                        "source '{}': path is empty",
                        source.name
                    )));
                }
            }
        }
    }

    for key in RESERVED_PARAMETERS {
        if request.parameters.contains_key(*key) {
            return Err(ReportError::config(format!(
                "parameter '{}' is reserved",
                key
            )));
        }
    }

    let mut known: BTreeSet<String> = names.iter().map(|s| s.to_string()).collect();
    for (idx, rule) in request.transforms.iter().enumerate() {
        for input in rule.inputs() {
            if !known.contains(input) {
                return Err(ReportError::config(format!(
                    "transform #{} ({}) reads unknown table '{}'",
                    idx + 1,
                    rule.op_name(),
                    input
                )));
            }
        }
        known.insert(rule.output().to_string());
    }

    for table in request.schemas.keys() {
        if !known.contains(table) {
            return Err(ReportError::config(format!(
                "schema declared for unknown table '{}'",
                table
            )));
        }
    }

    if let Some(DeliverySink::Email { to, subject, .. }) = &request.delivery {
        if to.is_empty() {
            return Err(ReportError::config("email delivery has no recipients"));
        }
        for address in to {
            validate_email(address)?;
        }
        if subject.trim().is_empty() {
            return Err(ReportError::config("email delivery subject is empty"));
        }
    }

    if request.timeout_ms == Some(0) {
        return Err(ReportError::config("timeout_ms must be greater than zero"));
    }

    Ok(())
}
