//! HTTP JSON source.
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use reportgen_core::{
    ApiConfig, FetchErrorKind, HttpMethod, ReportError, Result, SourceConfig, SourceKind, Table,
};

use crate::{classify_status, DataSource};

pub struct ApiSource {
    client: Client,
}

impl ApiSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reportgen/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ReportError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn validate(name: &str, config: &ApiConfig) -> Result<()> {
        if config.url.trim().is_empty() {
            return Err(ReportError::config(format!("source '{}': url is missing", name)));
        }
        let url = Url::parse(&config.url).map_err(|e| {
            ReportError::config(format!("source '{}': invalid url '{}': {}", name, config.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ReportError::config(format!(
                "source '{}': url scheme must be http or https",
                name
            )));
        }
        for (key, value) in &config.headers {
            HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                ReportError::config(format!("source '{}': invalid header name '{}'", name, key))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                ReportError::config(format!(
                    "source '{}': invalid value for header '{}'",
                    name, key
                ))
            })?;
        }
        if let Some(token) = &config.auth_token {
            HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ReportError::config(format!("source '{}': auth token is not a valid header value", name))
            })?;
        }
        if config.body.is_some() && config.method == HttpMethod::Get {
            return Err(ReportError::config(format!(
                "source '{}': a request body requires method POST",
                name
            )));
        }
        Ok(())
    }

    fn config<'a>(config: &'a SourceConfig) -> Result<&'a ApiConfig> {
        match &config.kind {
            SourceKind::Api(api) => Ok(api),
            _ => Err(ReportError::config(format!(
                "source '{}' is not an api source",
                config.name
            ))),
        }
    }

    fn request(&self, method: Method, api: &ApiConfig) -> reqwest::RequestBuilder {
        let query: Vec<(String, String)> = api
            .params
            .iter()
            .map(|(k, v)| (k.clone(), query_value(v)))
            .collect();

        let mut builder = self.client.request(method, &api.url).query(&query);
        for (key, value) in &api.headers {
            builder = builder.header(key, value);
        }
        if let Some(token) = &api.auth_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &api.body {
            builder = builder.json(body);
        }
        builder
    }
}

#[async_trait]
impl DataSource for ApiSource {
    async fn fetch(&self, config: &SourceConfig) -> Result<Table> {
        let api = Self::config(config)?;
        Self::validate(&config.name, api)?;

        let method = match api.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let response = self
            .request(method, api)
            .send()
            .await
            .map_err(|e| transport_error(&config.name, &e))?;

        let status = response.status().as_u16();
        if let Some(kind) = classify_status(status) {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!(source = %config.name, status = status, "api returned error status");
            return Err(ReportError::fetch(
                &config.name,
                kind,
                format!("HTTP {}: {}", status, snippet),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(&config.name, &e))?;
        let payload: Value = serde_json::from_slice(&bytes).map_err(|e| {
            ReportError::fetch(
                &config.name,
                FetchErrorKind::Parse,
                format!("response is not valid JSON: {}", e),
            )
        })?;

        let table = records_table(payload)
            .map_err(|msg| ReportError::fetch(&config.name, FetchErrorKind::Parse, msg))?;
        debug!(source = %config.name, rows = table.row_count(), "api response parsed");
        Ok(table)
    }

    async fn test_connection(&self, config: &SourceConfig) -> Result<bool> {
        let api = Self::config(config)?;
        Self::validate(&config.name, api)?;

        let head = self.client.head(&api.url).send().await;
        match head {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) if matches!(resp.status().as_u16(), 405 | 501) => {
                let get = self.request(Method::GET, api).send().await;
                Ok(get.map(|r| r.status().is_success()).unwrap_or(false))
            }
            Ok(_) | Err(_) => Ok(false),
        }
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn transport_error(name: &str, err: &reqwest::Error) -> ReportError {
    // A request that could not be built will fail the same way on every attempt.
    let kind = if err.is_builder() {
        FetchErrorKind::ClientError
    } else if err.is_timeout() {
        FetchErrorKind::Timeout
    } else if err.is_decode() {
        FetchErrorKind::Parse
    } else {
        FetchErrorKind::Connection
    };
    ReportError::fetch(name, kind, err.to_string())
}

const ENVELOPE_KEYS: [&str; 3] = ["data", "results", "items"];

/// Accepts a list of records, an envelope holding one under `data`,
/// `results` or `items`, or a single record.
fn records_table(payload: Value) -> std::result::Result<Table, String> {
    match payload {
        Value::Array(items) => Table::from_records(&items),
        Value::Object(obj) => {
            for key in ENVELOPE_KEYS {
                if let Some(Value::Array(items)) = obj.get(key) {
                    return Table::from_records(items);
                }
            }
            Table::from_records(&[Value::Object(obj)])
        }
        other => Err(format!(
            "expected a JSON array or object, got {}",
            match other {
                Value::Null => "null",
                Value::Bool(_) => "a boolean",
                Value::Number(_) => "a number",
                _ => "a string",
            }
        )),
    }
}
