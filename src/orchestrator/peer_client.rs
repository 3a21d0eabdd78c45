//! HTTP delivery to peer gateways and local push-agent webhooks.

use async_trait::async_trait;

use crate::discovery::CapabilityRecord;
use crate::identifiers::IdempotencyKey;
use crate::message::Message;

use super::retry::RetryPolicy;

/// The outcome of a single delivery attempt.
pub enum DeliveryAttemptOutcome {
    Delivered,
    Transient(String),
    Permanent(String),
}

/// Why a delivery attempt failed, for classification into retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailureKind {
    Network,
    Status(u16),
}

impl DeliveryFailureKind {
    #[must_use]
    pub fn is_transient(self) -> bool {
        match self {
            Self::Network => true,
            Self::Status(status) => RetryPolicy::is_transient_status(status),
        }
    }
}

/// Delivers messages to peer gateways (remote) or local push agents,
/// always sending the same idempotency key on every retry attempt (spec
/// §4.2's at-most-once-effective-delivery requirement).
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn deliver_remote(
        &self,
        capability: &CapabilityRecord,
        message: &Message,
        recipient: &str,
        idempotency_key: IdempotencyKey,
    ) -> DeliveryAttemptOutcome;

    async fn push_local(
        &self,
        target_url: &str,
        message: &Message,
        idempotency_key: IdempotencyKey,
    ) -> DeliveryAttemptOutcome;
}

/// Production `PeerClient` backed by `reqwest`.
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn post_envelope(
        &self,
        url: &str,
        message: &Message,
        idempotency_key: IdempotencyKey,
        retry_after_honored: bool,
    ) -> DeliveryAttemptOutcome {
        let response = self
            .client
            .post(url)
            .header("X-Idempotency-Key", idempotency_key.to_string())
            .json(message)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => return DeliveryAttemptOutcome::Transient(err.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return DeliveryAttemptOutcome::Delivered;
        }

        if retry_after_honored && status.as_u16() == 429 {
            if let Some(retry_after) = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
            {
                tokio::time::sleep(std::time::Duration::from_secs(retry_after)).await;
            }
        }

        if RetryPolicy::is_transient_status(status.as_u16()) {
            DeliveryAttemptOutcome::Transient(format!("peer responded {status}"))
        } else {
            DeliveryAttemptOutcome::Permanent(format!("peer rejected with {status}"))
        }
    }
}

impl Default for HttpPeerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn deliver_remote(
        &self,
        capability: &CapabilityRecord,
        message: &Message,
        _recipient: &str,
        idempotency_key: IdempotencyKey,
    ) -> DeliveryAttemptOutcome {
        let url = format!("{}/v1/messages", capability.gateway_url.trim_end_matches('/'));
        self.post_envelope(&url, message, idempotency_key, true).await
    }

    async fn push_local(
        &self,
        target_url: &str,
        message: &Message,
        idempotency_key: IdempotencyKey,
    ) -> DeliveryAttemptOutcome {
        self.post_envelope(target_url, message, idempotency_key, false).await
    }
}

/// In-memory mock for tests: records every attempt and replays a
/// caller-scripted outcome.
pub struct MockPeerClient {
    pub outcomes: dashmap::DashMap<String, Vec<DeliveryAttemptOutcomeKind>>,
    pub attempts: dashmap::DashMap<String, std::sync::atomic::AtomicU32>,
}

#[derive(Debug, Clone, Copy)]
pub enum DeliveryAttemptOutcomeKind {
    Delivered,
    Transient,
    Permanent,
}

impl Default for MockPeerClient {
    fn default() -> Self {
        Self {
            outcomes: dashmap::DashMap::new(),
            attempts: dashmap::DashMap::new(),
        }
    }
}

impl MockPeerClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, recipient: impl Into<String>, outcomes: Vec<DeliveryAttemptOutcomeKind>) {
        self.outcomes.insert(recipient.into(), outcomes);
    }

    fn next_outcome(&self, recipient: &str) -> DeliveryAttemptOutcome {
        let counter = self
            .attempts
            .entry(recipient.to_string())
            .or_insert_with(|| std::sync::atomic::AtomicU32::new(0));
        let index = counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as usize;
        let Some(script) = self.outcomes.get(recipient) else {
            return DeliveryAttemptOutcome::Delivered;
        };
        match script.get(index).or_else(|| script.last()) {
            Some(DeliveryAttemptOutcomeKind::Delivered) | None => DeliveryAttemptOutcome::Delivered,
            Some(DeliveryAttemptOutcomeKind::Transient) => {
                DeliveryAttemptOutcome::Transient("scripted transient failure".to_string())
            }
            Some(DeliveryAttemptOutcomeKind::Permanent) => {
                DeliveryAttemptOutcome::Permanent("scripted permanent failure".to_string())
            }
        }
    }
}

#[async_trait]
impl PeerClient for MockPeerClient {
    async fn deliver_remote(
        &self,
        _capability: &CapabilityRecord,
        _message: &Message,
        recipient: &str,
        _idempotency_key: IdempotencyKey,
    ) -> DeliveryAttemptOutcome {
        self.next_outcome(recipient)
    }

    async fn push_local(
        &self,
        target_url: &str,
        _message: &Message,
        _idempotency_key: IdempotencyKey,
    ) -> DeliveryAttemptOutcome {
        self.next_outcome(target_url)
    }
}
