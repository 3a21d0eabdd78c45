//! Message manager: the public facade binding validation,
//! idempotency, orchestration, and the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent_registry::AgentRegistry;
use crate::domain_types::{EmailAddress, MessageSizeBytes};
use crate::identifiers::{IdempotencyKey, MessageId, SchemaId};
use crate::idempotency::{IdempotencyIndex, IdempotencyOutcome};
use crate::message::{AttachmentDescriptor, CoordinationConfig, Message, MessageStatus};
use crate::orchestrator::DeliveryOrchestrator;
use crate::schema::{NegotiationEngine, ValidationReport, Validator};
use crate::store::{MessageStore, StoreError};

/// A send request as received from the HTTP binding.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub sender: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub coordination: Option<CoordinationConfig>,
    #[serde(default)]
    pub attachments: Option<Vec<AttachmentDescriptor>>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
}

/// A successful send's response.
#[derive(Debug, Clone, Serialize)]
pub struct SendResponse {
    pub message_id: MessageId,
    pub status: &'static str,
    pub recipients: Vec<RecipientAck>,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientAck {
    pub address: String,
    pub status: &'static str,
}

/// Errors raised by the message manager's facade operations.
#[derive(Debug, Clone, Error)]
pub enum MessageManagerError {
    #[error("validation failed: {0:?}")]
    Validation(Vec<crate::schema::validator::ValidationIssue>),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("schema required")]
    SchemaRequired,

    #[error("schema error: {0}")]
    Schema(#[from] crate::schema::SchemaError),

    #[error("message too large: {actual} exceeds {max}")]
    TooLarge { actual: usize, max: usize },

    #[error("agents reject schema: {0:?}")]
    AgentSchemaMismatch(Vec<String>),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] crate::orchestrator::OrchestratorError),

    #[error("global in-flight capacity reached")]
    RateLimited,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("unknown message id: {0}")]
    NotFound(MessageId),
}

/// Facade composing validation, idempotency, orchestration, and storage.
pub struct MessageManager {
    local_domain: String,
    max_size: MessageSizeBytes,
    validator: Option<Arc<Validator>>,
    negotiation: Option<Arc<NegotiationEngine>>,
    agent_registry: Arc<AgentRegistry>,
    orchestrator: Arc<DeliveryOrchestrator>,
    store: Arc<dyn MessageStore>,
    idempotency: Arc<IdempotencyIndex<SendResponse>>,
}

impl MessageManager {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_domain: impl Into<String>,
        max_size: MessageSizeBytes,
        validator: Option<Arc<Validator>>,
        negotiation: Option<Arc<NegotiationEngine>>,
        agent_registry: Arc<AgentRegistry>,
        orchestrator: Arc<DeliveryOrchestrator>,
        store: Arc<dyn MessageStore>,
        idempotency: Arc<IdempotencyIndex<SendResponse>>,
    ) -> Self {
        Self {
            local_domain: local_domain.into(),
            max_size,
            validator,
            negotiation,
            agent_registry,
            orchestrator,
            store,
            idempotency,
        }
    }

    /// Accepts a send request and returns immediately with `accepted` +
    /// per-recipient `pending` records.
    pub async fn send(&self, request: SendRequest) -> Result<SendResponse, MessageManagerError> {
        let sender = EmailAddress::try_new(&request.sender).map_err(|e| {
            MessageManagerError::InvalidField {
                field: "sender".to_string(),
                reason: e.to_string(),
            }
        })?;

        if request.recipients.is_empty() {
            return Err(MessageManagerError::InvalidField {
                field: "recipients".to_string(),
                reason: "at least one recipient is required".to_string(),
            });
        }
        let recipients: Vec<EmailAddress> = request
            .recipients
            .iter()
            .map(|r| {
                EmailAddress::try_new(r).map_err(|e| MessageManagerError::InvalidField {
                    field: "recipients".to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;

        let schema = request
            .schema
            .as_deref()
            .map(SchemaId::parse)
            .transpose()
            .map_err(|e| MessageManagerError::InvalidField {
                field: "schema".to_string(),
                reason: e.to_string(),
            })?;

        if let Some(attachments) = &request.attachments {
            for attachment in attachments {
                attachment
                    .validate()
                    .map_err(|e| MessageManagerError::InvalidField {
                        field: "attachments".to_string(),
                        reason: e.to_string(),
                    })?;
            }
        }

        if !self.orchestrator.has_global_capacity() {
            return Err(MessageManagerError::RateLimited);
        }

        let idempotency_key = match &request.idempotency_key {
            Some(raw) => raw.parse::<IdempotencyKey>().map_err(|e| {
                MessageManagerError::InvalidField {
                    field: "idempotency_key".to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => IdempotencyKey::generate(),
        };

        let sender_key = request.sender.clone();

        match self
            .idempotency
            .check_or_wait(sender_key.as_str(), idempotency_key)
            .await
        {
            IdempotencyOutcome::Existing(response) => return Ok(response),
            IdempotencyOutcome::Winner => {}
        }

        let outcome = self
            .process_new_send(request, sender, recipients, schema, idempotency_key)
            .await;

        match &outcome {
            Ok(response) => self.idempotency.settle(&sender_key, idempotency_key, response.clone()),
            Err(_) => {} // a failed validation never occupies the idempotency slot as settled
        }
        outcome
    }

    async fn process_new_send(
        &self,
        request: SendRequest,
        sender: EmailAddress,
        recipients: Vec<EmailAddress>,
        schema: Option<SchemaId>,
        idempotency_key: IdempotencyKey,
    ) -> Result<SendResponse, MessageManagerError> {
        let rendered_schema = schema.as_ref().map(ToString::to_string).unwrap_or_default();

        if let Some(validator) = &self.validator {
            if let Some(schema_id) = &schema {
                let negotiation = match &self.negotiation {
                    Some(engine) => engine.negotiate(schema_id).await?,
                    None => crate::schema::NegotiationReport {
                        requested: schema_id.clone(),
                        negotiated: schema_id.clone(),
                        exact_match: true,
                    },
                };
                if let Some(payload) = &request.payload {
                    let bytes = serde_json::to_vec(payload).unwrap_or_default();
                    let report: ValidationReport = validator.validate(&bytes, &negotiation).await?;
                    if !report.valid {
                        return Err(MessageManagerError::Validation(report.errors));
                    }
                }
            }
        }

        let rejected = self.agent_registry.check_feasibility(
            &self.local_domain,
            &request.recipients,
            &rendered_schema,
        );
        let local_domain_suffix = format!("@{}", self.local_domain);
        let local_recipient_count =
            request.recipients.iter().filter(|r| r.ends_with(&local_domain_suffix)).count();
        if local_recipient_count > 0 && rejected.len() == local_recipient_count {
            return Err(MessageManagerError::AgentSchemaMismatch(rejected));
        }

        let message = Message {
            protocol_version: crate::message::PROTOCOL_VERSION.to_string(),
            message_id: MessageId::generate(),
            idempotency_key,
            timestamp: Utc::now(),
            sender,
            recipients: recipients.clone(),
            subject: request.subject,
            schema,
            in_reply_to: request
                .in_reply_to
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|e: crate::identifiers::IdentifierError| MessageManagerError::InvalidField {
                    field: "in_reply_to".to_string(),
                    reason: e.to_string(),
                })?,
            headers: request.headers,
            payload: request.payload,
            coordination: request.coordination,
            attachments: request.attachments,
        };

        if let Ok(size) = message.serialized_size() {
            if size > self.max_size.as_usize() {
                return Err(MessageManagerError::TooLarge {
                    actual: size,
                    max: self.max_size.as_usize(),
                });
            }
        }

        let message = Arc::new(message);
        self.store.put_message((*message).clone()).await?;
        self.orchestrator.accept(message.clone()).await?;

        Ok(SendResponse {
            message_id: message.message_id,
            status: "accepted",
            recipients: recipients
                .iter()
                .map(|r| RecipientAck {
                    address: r.to_string(),
                    status: "pending",
                })
                .collect(),
            timestamp: message.timestamp,
        })
    }

    pub async fn get_message(&self, id: &MessageId) -> Result<Message, MessageManagerError> {
        self.store
            .get_message(id)
            .await
            .map_err(|_| MessageManagerError::NotFound(*id))
    }

    pub async fn get_message_status(&self, id: &MessageId) -> Result<MessageStatus, MessageManagerError> {
        self.store
            .get_status(id)
            .await
            .map_err(|_| MessageManagerError::NotFound(*id))
    }

    /// Validates, dedupes, and delivers a peer-originated message locally
    ///.
    pub async fn receive_message(&self, message: Message) -> Result<(), MessageManagerError> {
        let message = Arc::new(message);
        self.store.put_message((*message).clone()).await?;
        self.orchestrator.accept(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_registry::AgentRegistry;
    use crate::idempotency::IdempotencyIndex;
    use crate::orchestrator::peer_client::MockPeerClient;
    use crate::orchestrator::{DeliveryOrchestrator, OrchestratorConfig};
    use crate::store::InMemoryMessageStore;
    use crate::discovery::{DiscoveryCache, DiscoveryConfig};
    use crate::discovery::dns::StaticDnsResolver;
    use crate::metrics::TracingMetricsProvider;
    use crate::time_provider::test_time_provider;

    fn harness() -> MessageManager {
        let time = test_time_provider();
        let discovery = Arc::new(DiscoveryCache::new(
            Arc::new(StaticDnsResolver::new(std::collections::HashMap::new())),
            DiscoveryConfig::default(),
            time.clone(),
        ));
        let agent_registry = Arc::new(AgentRegistry::new("example.com", None));
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let orchestrator = DeliveryOrchestrator::spawn(
            OrchestratorConfig {
                local_domain: "example.com".to_string(),
                ..OrchestratorConfig::default()
            },
            discovery,
            agent_registry.clone(),
            Arc::new(MockPeerClient::new()),
            store.clone(),
            Arc::new(TracingMetricsProvider::new()),
            time.clone(),
            2,
            16,
        );
        let idempotency = Arc::new(IdempotencyIndex::new(
            std::time::Duration::from_secs(3600),
            time,
        ));
        MessageManager::new(
            "example.com",
            MessageSizeBytes::default_max(),
            None,
            None,
            agent_registry,
            orchestrator,
            store,
            idempotency,
        )
    }

    #[tokio::test]
    async fn send_accepts_and_records_pending_recipients() {
        let manager = harness();
        let response = manager
            .send(SendRequest {
                sender: "alice@example.com".to_string(),
                recipients: vec!["bob@example.com".to_string()],
                subject: None,
                schema: None,
                idempotency_key: None,
                payload: None,
                headers: None,
                coordination: None,
                attachments: None,
                in_reply_to: None,
            })
            .await
            .expect("send should succeed");

        assert_eq!(response.status, "accepted");
        assert_eq!(response.recipients.len(), 1);
        assert_eq!(response.recipients[0].status, "pending");
    }

    #[tokio::test]
    async fn send_with_same_idempotency_key_returns_same_message_id() {
        let manager = harness();
        let key = IdempotencyKey::generate().to_string();
        let request = || SendRequest {
            sender: "alice@example.com".to_string(),
            recipients: vec!["bob@example.com".to_string()],
            subject: None,
            schema: None,
            idempotency_key: Some(key.clone()),
            payload: None,
            headers: None,
            coordination: None,
            attachments: None,
            in_reply_to: None,
        };

        let first = manager.send(request()).await.expect("first send succeeds");
        let second = manager.send(request()).await.expect("second send succeeds");
        assert_eq!(first.message_id, second.message_id);
    }

    #[tokio::test]
    async fn send_rejects_empty_recipients() {
        let manager = harness();
        let result = manager
            .send(SendRequest {
                sender: "alice@example.com".to_string(),
                recipients: vec![],
                subject: None,
                schema: None,
                idempotency_key: None,
                payload: None,
                headers: None,
                coordination: None,
                attachments: None,
                in_reply_to: None,
            })
            .await;
        assert!(matches!(result, Err(MessageManagerError::InvalidField { .. })));
    }

    #[tokio::test]
    async fn get_message_returns_not_found_for_unknown_id() {
        let manager = harness();
        let result = manager.get_message(&MessageId::generate()).await;
        assert!(matches!(result, Err(MessageManagerError::NotFound(_))));
    }
}
