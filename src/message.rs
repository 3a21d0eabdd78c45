//! Message data model: `Message`, coordination config, attachment
//! descriptors, and the per-recipient delivery state machine.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::EmailAddress;
use crate::identifiers::{IdempotencyKey, MessageId, SchemaId};

/// The fixed protocol version string.
pub const PROTOCOL_VERSION: &str = "1.0";

/// A fully assigned, canonical message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub protocol_version: String,
    pub message_id: MessageId,
    pub idempotency_key: IdempotencyKey,
    pub timestamp: DateTime<Utc>,
    pub sender: EmailAddress,
    pub recipients: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<std::collections::BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordination: Option<CoordinationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentDescriptor>>,
}

impl Message {
    /// Serialized byte length, used to enforce the configured size ceiling.
    pub fn serialized_size(&self) -> Result<usize, serde_json::Error> {
        Ok(serde_json::to_vec(self)?.len())
    }
}

/// A positive duration, expressed as whole seconds, for coordination timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct TimeoutSeconds(u64);

impl TimeoutSeconds {
    pub fn try_new(secs: u64) -> Result<Self, MessageModelError> {
        if secs == 0 {
            return Err(MessageModelError::NonPositiveTimeout);
        }
        Ok(Self(secs))
    }

    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.0)
    }

    #[must_use]
    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for TimeoutSeconds {
    type Error = MessageModelError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<TimeoutSeconds> for u64 {
    fn from(value: TimeoutSeconds) -> Self {
        value.0
    }
}

/// A single conditional-coordination rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalRule {
    #[serde(rename = "if")]
    pub condition: String,
    #[serde(rename = "then")]
    pub then_recipients: Vec<EmailAddress>,
    #[serde(rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_recipients: Option<Vec<EmailAddress>>,
}

/// Multi-recipient delivery coordination policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationConfig {
    Parallel {
        timeout: TimeoutSeconds,
        #[serde(skip_serializing_if = "Option::is_none")]
        required_responses: Option<Vec<EmailAddress>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        optional_responses: Option<Vec<EmailAddress>>,
    },
    Sequential {
        sequence: Vec<EmailAddress>,
        timeout: TimeoutSeconds,
        #[serde(skip_serializing_if = "Option::is_none")]
        required_responses: Option<Vec<EmailAddress>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        optional_responses: Option<Vec<EmailAddress>>,
    },
    Conditional {
        conditions: Vec<ConditionalRule>,
        timeout: TimeoutSeconds,
        #[serde(skip_serializing_if = "Option::is_none")]
        required_responses: Option<Vec<EmailAddress>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        optional_responses: Option<Vec<EmailAddress>>,
    },
}

impl CoordinationConfig {
    #[must_use]
    pub fn timeout(&self) -> TimeoutSeconds {
        match self {
            Self::Parallel { timeout, .. }
            | Self::Sequential { timeout, .. }
            | Self::Conditional { timeout, .. } => *timeout,
        }
    }
}

static HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(sha256|sha512|md5):[0-9a-fA-F]+$").expect("valid regex"));

/// A by-reference attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub content_hash: String,
    pub url: String,
}

impl AttachmentDescriptor {
    pub fn validate(&self) -> Result<(), MessageModelError> {
        if !HASH_RE.is_match(&self.content_hash) {
            return Err(MessageModelError::InvalidAttachmentHash(
                self.content_hash.clone(),
            ));
        }
        let parsed = url::Url::parse(&self.url)
            .map_err(|_| MessageModelError::InvalidAttachmentUrl(self.url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MessageModelError::InvalidAttachmentUrl(self.url.clone()));
        }
        Ok(())
    }
}

/// Errors raised while constructing or validating message-model values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageModelError {
    #[error("timeout must be a positive number of seconds")]
    NonPositiveTimeout,

    #[error("invalid attachment content hash: {0}")]
    InvalidAttachmentHash(String),

    #[error("invalid attachment url: {0}")]
    InvalidAttachmentUrl(String),
}

/// Per-recipient delivery status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Queued,
    Delivering,
    Delivered,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DeliveryStatus {
    type Err = MessageModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "queued" => Self::Queued,
            "delivering" => Self::Delivering,
            "delivered" => Self::Delivered,
            "failed" => Self::Failed,
            "retrying" => Self::Retrying,
            _ => return Err(MessageModelError::NonPositiveTimeout),
        })
    }
}

/// Per-recipient delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub address: EmailAddress,
    pub status: DeliveryStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    #[must_use]
    pub fn pending(address: EmailAddress, now: DateTime<Utc>) -> Self {
        Self {
            address,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, status: DeliveryStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;
    }
}

/// Full status response for `GET /v1/messages/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStatus {
    pub message_id: MessageId,
    pub recipients: Vec<DeliveryRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_requires_recognized_hash_algo() {
        let mut attachment = AttachmentDescriptor {
            filename: "f.txt".into(),
            content_type: "text/plain".into(),
            size: 10,
            content_hash: "sha256:abc123".into(),
            url: "https://example.com/f.txt".into(),
        };
        assert!(attachment.validate().is_ok());
        attachment.content_hash = "crc32:abc123".into();
        assert!(attachment.validate().is_err());
    }

    #[test]
    fn attachment_requires_http_url() {
        let attachment = AttachmentDescriptor {
            filename: "f.txt".into(),
            content_type: "text/plain".into(),
            size: 10,
            content_hash: "md5:abc123".into(),
            url: "ftp://example.com/f.txt".into(),
        };
        assert!(attachment.validate().is_err());
    }

    #[test]
    fn delivery_status_terminal_set() {
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::Retrying.is_terminal());
    }
}
