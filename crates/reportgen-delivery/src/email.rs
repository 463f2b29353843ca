//! Email sink: an RFC 5322 message with the artifact attached, handed to a
//! [`Mailer`].
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::debug;

use reportgen_core::{Artifact, ReportError, Result};

const SINK: &str = "email";
const LINE: &str = "\r\n";

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub message_id: String,
    pub date: DateTime<Utc>,
    pub attachment_name: String,
    pub attachment_mime: String,
    pub attachment: Vec<u8>,
}

impl EmailMessage {
    pub fn for_artifact(
        artifact: &Artifact,
        from: &str,
        to: &[String],
        subject: &str,
        body: Option<&str>,
    ) -> Self {
        let body = body.map(str::to_string).unwrap_or_else(|| {
            format!(
                "Report {} ({}) is attached.",
                artifact.report_id,
                artifact.metadata.template
            )
        });
        Self {
            from: from.to_string(),
            to: to.to_vec(),
            subject: subject.to_string(),
            body,
            message_id: format!("<{}@reportgen>", artifact.id),
            date: artifact.metadata.generated_at,
            attachment_name: artifact.file_name(),
            attachment_mime: artifact.format.mime().to_string(),
            attachment: artifact.content.clone(),
        }
    }

    fn boundary(&self) -> String {
        let digest = blake_hex(&self.attachment);
        format!("reportgen-{}", &digest[..24])
    }

    /// Serialize as a `multipart/mixed` message with CRLF line endings.
    pub fn to_rfc5322(&self) -> String {
        let boundary = self.boundary();
        let mut out = String::new();
        let mut header = |name: &str, value: &str| {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(&single_line(value));
            out.push_str(LINE);
        };
        header("From", &self.from);
        header("To", &self.to.join(", "));
        header("Subject", &encode_header(&self.subject));
        header("Date", &self.date.to_rfc2822());
        header("Message-ID", &self.message_id);
        header("MIME-Version", "1.0");
        header(
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{}\"", boundary),
        );
        out.push_str(LINE);

        out.push_str(&format!("--{}{}", boundary, LINE));
        out.push_str(&format!("Content-Type: text/plain; charset=utf-8{}", LINE));
        out.push_str(&format!("Content-Transfer-Encoding: base64{}{}", LINE, LINE));
        push_base64(&mut out, self.body.as_bytes());

        out.push_str(&format!("--{}{}", boundary, LINE));
        out.push_str(&format!(
            "Content-Type: {}; name=\"{}\"{}",
            self.attachment_mime, self.attachment_name, LINE
        ));
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"{}",
            self.attachment_name, LINE
        ));
        out.push_str(&format!("Content-Transfer-Encoding: base64{}{}", LINE, LINE));
        push_base64(&mut out, &self.attachment);

        out.push_str(&format!("--{}--{}", boundary, LINE));
        out
    }
}

fn blake_hex(bytes: &[u8]) -> String {
    reportgen_core::hash_bytes(bytes)
        .trim_start_matches("blake3:")
        .to_string()
}

/// Header values never carry raw line breaks.
fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

/// RFC 2047 encoded-word for non-ASCII header text.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", BASE64.encode(value.as_bytes()))
    }
}

fn push_base64(out: &mut String, bytes: &[u8]) {
    let encoded = BASE64.encode(bytes);
    for chunk in encoded.as_bytes().chunks(76) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str(LINE);
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hand off one message; returns where it went.
    async fn send(&self, message: &EmailMessage) -> Result<String>;
}

/// Writes each message as `<dir>/<message id>.eml` for a local MTA or a
/// test to pick up.
pub struct PickupDirMailer {
    dir: PathBuf,
}

impl PickupDirMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Mailer for PickupDirMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        let stem: String = message
            .message_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let path = self.dir.join(format!("{}.eml", stem));

        let io = |e: std::io::Error| ReportError::delivery(SINK, e.to_string(), true);
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;
        tokio::fs::write(&path, message.to_rfc5322()).await.map_err(io)?;

        debug!(path = %path.display(), recipients = message.to.len(), "message written to pickup directory");
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            from: "reports@example.com".into(),
            to: vec!["a@example.com".into(), "b@example.com".into()],
            subject: "Weekly\r\nBcc: evil@example.com".into(),
            body: "Attached.".into(),
            message_id: "<art_1@reportgen>".into(),
            date: DateTime::parse_from_rfc3339("2024-03-04T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            attachment_name: "rpt_1.pdf".into(),
            attachment_mime: "application/pdf".into(),
            attachment: b"%PDF-1.4 fake".to_vec(),
        }
    }

    #[test]
    fn test_message_layout() {
        let raw = message().to_rfc5322();
        assert!(raw.contains("To: a@example.com, b@example.com\r\n"));
        assert!(raw.contains("Date: Mon, "));
        assert!(raw.contains("Mar 2024 09:00:00 +0000\r\n"));
        assert!(raw.contains("filename=\"rpt_1.pdf\""));
        assert!(raw.contains(&BASE64.encode(b"%PDF-1.4 fake")));
        assert!(raw.trim_end().ends_with("--"));
    }

    #[test]
    fn test_header_injection_is_flattened() {
        let raw = message().to_rfc5322();
        assert!(!raw.contains("\r\nBcc:"));
        assert!(raw.contains("Subject: Weekly  Bcc: evil@example.com\r\n"));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let mut m = message();
        m.subject = "Relatório".into();
        assert!(m.to_rfc5322().contains("Subject: =?UTF-8?B?"));
    }

    #[tokio::test]
    async fn test_pickup_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = PickupDirMailer::new(dir.path().join("outbox"));
        let location = mailer.send(&message()).await.unwrap();
        assert!(location.ends_with("art_1reportgen.eml"));

        let written =
            std::fs::read_to_string(dir.path().join("outbox").join("art_1reportgen.eml")).unwrap();
        assert_eq!(written, message().to_rfc5322());
    }
}
