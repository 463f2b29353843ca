//! Webhook sink: POST the artifact bytes to a caller-supplied URL.
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use reportgen_core::{Artifact, ReportError, Result};

const SINK: &str = "webhook";

pub struct WebhookSink {
    client: Client,
}

impl WebhookSink {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reportgen/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReportError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn validate(url: &str) -> Result<()> {
        let parsed = Url::parse(url)
            .map_err(|e| ReportError::config(format!("invalid webhook url '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ReportError::config(format!(
                "webhook url '{}' must use http or https",
                url
            )));
        }
        Ok(())
    }

    /// One POST. 5xx, 408, 429 and transport errors are transient.
    pub async fn post(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        artifact: &Artifact,
    ) -> Result<String> {
        let mut builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, artifact.format.mime())
            .header("X-Report-Id", artifact.report_id.to_string())
            .header("X-Artifact-Hash", artifact.metadata.content_hash.as_str());
        for (key, value) in headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder
            .body(artifact.content.clone())
            .send()
            .await
            .map_err(|e| {
                ReportError::delivery(SINK, format!("request to {} failed: {}", url, e), !e.is_builder())
            })?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "webhook responded");
        if status.is_success() {
            return Ok(url.to_string());
        }

        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        Err(ReportError::delivery(
            SINK,
            format!("HTTP {}: {}", status.as_u16(), snippet),
            is_transient_status(status),
        ))
    }
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(WebhookSink::validate("https://hooks.example.com/r").is_ok());
        assert!(WebhookSink::validate("ftp://hooks.example.com").is_err());
        assert!(WebhookSink::validate("not a url").is_err());
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
    }
}
