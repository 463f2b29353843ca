//! Report Generator Delivery
//!
//! Sends a finished artifact to one sink with bounded retries. Delivery
//! never fails the report: the outcome is recorded next to the artifact.

pub mod email;
pub mod object_store;
pub mod webhook;

pub use email::{EmailMessage, Mailer, PickupDirMailer};
pub use object_store::{LocalObjectStore, ObjectStore};
pub use webhook::WebhookSink;

use chrono::{DateTime, Utc};
use reportgen_core::{
    validation::validate_email, Artifact, DeliverySink, EngineConfig, ReportError, Result,
    RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_SENDER: &str = "reportgen@localhost";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub sink: String,
    pub location: String,
    pub attempts: u32,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered(DeliveryReceipt),
    Failed {
        sink: String,
        attempts: u32,
        error: ReportError,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered(receipt) => receipt.attempts,
            Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Check a sink before any report work starts.
pub fn validate_sink(sink: &DeliverySink) -> Result<()> {
    match sink {
        DeliverySink::Email { to, subject, .. } => {
            if to.is_empty() {
                return Err(ReportError::config("email delivery has no recipients"));
            }
            for address in to {
                validate_email(address)?;
            }
            if subject.trim().is_empty() {
                return Err(ReportError::config("email delivery subject is empty"));
            }
            Ok(())
        }
        DeliverySink::Webhook { url, .. } => WebhookSink::validate(url),
        DeliverySink::ObjectStore { bucket, key } => {
            object_store::validate_bucket(bucket)?;
            key.as_deref().map(object_store::validate_key).transpose()?;
            Ok(())
        }
    }
}

pub struct Deliverer {
    webhook: WebhookSink,
    store: Arc<dyn ObjectStore>,
    mailer: Arc<dyn Mailer>,
    retry: RetryPolicy,
    sender: String,
}

impl Deliverer {
    /// Filesystem store and pickup mailer under `output_dir` (default
    /// `./reports`), retries per `delivery_retry`.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let root = config
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("reports"));
        Ok(Self {
            webhook: WebhookSink::new(config.fetch_timeout())?,
            store: Arc::new(LocalObjectStore::new(root.join("objects"))),
            mailer: Arc::new(PickupDirMailer::new(root.join("outbox"))),
            retry: config.delivery_retry.clone(),
            sender: DEFAULT_SENDER.to_string(),
        })
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub async fn deliver(&self, artifact: &Artifact, sink: &DeliverySink) -> DeliveryOutcome {
        let kind = sink.kind_name();
        if let Err(error) = validate_sink(sink) {
            return DeliveryOutcome::Failed {
                sink: kind.to_string(),
                attempts: 0,
                error,
            };
        }

        let operation = format!("deliver.{}", kind);
        let (result, attempts) = self
            .retry
            .run(&operation, |_| self.send_once(artifact, sink))
            .await;

        match result {
            Ok(location) => {
                info!(
                    report_id = %artifact.report_id,
                    sink = kind,
                    location = %location,
                    attempts = attempts,
                    "artifact delivered"
                );
                DeliveryOutcome::Delivered(DeliveryReceipt {
                    sink: kind.to_string(),
                    location,
                    attempts,
                    delivered_at: Utc::now(),
                })
            }
            Err(error) => {
                warn!(
                    report_id = %artifact.report_id,
                    sink = kind,
                    attempts = attempts,
                    error = %error,
                    "delivery failed"
                );
                DeliveryOutcome::Failed {
                    sink: kind.to_string(),
                    attempts,
                    error,
                }
            }
        }
    }

    async fn send_once(&self, artifact: &Artifact, sink: &DeliverySink) -> Result<String> {
        match sink {
            DeliverySink::Email { to, subject, body } => {
                let message =
                    EmailMessage::for_artifact(artifact, &self.sender, to, subject, body.as_deref());
                self.mailer.send(&message).await
            }
            DeliverySink::Webhook { url, headers } => {
                self.webhook.post(url, headers, artifact).await
            }
            DeliverySink::ObjectStore { bucket, key } => {
                let key = key.clone().unwrap_or_else(|| artifact.file_name());
                self.store
                    .put(bucket, &key, &artifact.content, artifact.format.mime())
                    .await
            }
        }
    }
}
