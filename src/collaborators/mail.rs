use super::{CollaboratorError, NotificationTransport, OutboundNotification};
use crate::config::NotificationConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

const SERVICE: &str = "mail relay";
const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct RelayAttachment {
    filename: String,
    content_type: &'static str,
    content_base64: String,
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    to: &'a [String],
    subject: &'a str,
    body: &'a str,
    attachments: Vec<RelayAttachment>,
}

/// Hands messages to an HTTP mail relay as JSON, attachments inlined as base64.
#[derive(Debug, Clone)]
pub struct HttpMailRelay {
    agent: ureq::Agent,
    relay_url: String,
    sender: Option<String>,
}

impl HttpMailRelay {
    pub fn new(relay_url: impl Into<String>, sender: Option<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(RELAY_TIMEOUT).build(),
            relay_url: relay_url.into(),
            sender,
        }
    }

    /// `None` when no relay URL is configured.
    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        config
            .relay_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| Self::new(url, config.sender.clone()))
    }
}

fn load_attachment(attachment_ref: &str) -> Result<RelayAttachment, CollaboratorError> {
    let path = Path::new(attachment_ref);
    let bytes = fs::read(path).map_err(|source| CollaboratorError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("attachment")
        .to_string();
    let content_type = if filename.ends_with(".csv") {
        "text/csv"
    } else {
        "application/octet-stream"
    };
    Ok(RelayAttachment {
        filename,
        content_type,
        content_base64: STANDARD.encode(bytes),
    })
}

impl NotificationTransport for HttpMailRelay {
    fn send(&self, notification: &OutboundNotification) -> Result<(), CollaboratorError> {
        let attachments = notification
            .attachment_ref
            .as_deref()
            .map(load_attachment)
            .transpose()?
            .into_iter()
            .collect();
        let message = RelayMessage {
            from: self.sender.as_deref(),
            to: &notification.recipients,
            subject: &notification.subject,
            body: &notification.body,
            attachments,
        };
        self.agent
            .post(&self.relay_url)
            .send_json(&message)
            .map_err(|err| CollaboratorError::from_ureq(SERVICE, err))?;
        tracing::info!(recipients = notification.recipients.len(), "notification handed to relay");
        Ok(())
    }
}

/// Transport used when no relay is configured; every send fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTransport;

impl NotificationTransport for UnconfiguredTransport {
    fn send(&self, _notification: &OutboundNotification) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::NotConfigured {
            service: SERVICE.to_string(),
            reason: "set `notification.relay_url` to send reports".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_is_inlined_as_base64() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("findings.csv");
        fs::write(&path, "a,b\n").expect("write");
        let attachment = load_attachment(path.to_str().expect("utf8 path")).expect("load");
        assert_eq!(attachment.filename, "findings.csv");
        assert_eq!(attachment.content_type, "text/csv");
        assert_eq!(attachment.content_base64, STANDARD.encode("a,b\n"));
    }

    #[test]
    fn relay_is_optional() {
        assert!(HttpMailRelay::from_config(&NotificationConfig::default()).is_none());
    }
}
