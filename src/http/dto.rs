//! Wire DTOs for the HTTP binding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent_registry::{AgentSummary, DeliveryMode};
use crate::message::{DeliveryRecord, Message};

#[derive(Debug, Clone, Serialize)]
pub struct RecipientStatusDto {
    pub address: String,
    pub status: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&DeliveryRecord> for RecipientStatusDto {
    fn from(record: &DeliveryRecord) -> Self {
        Self {
            address: record.address.to_string(),
            status: record.status.to_string(),
            attempts: record.attempts,
            last_error: record.last_error.clone(),
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageStatusDto {
    pub message_id: String,
    pub recipients: Vec<RecipientStatusDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDto {
    pub protocol_version: String,
    pub message_id: String,
    pub idempotency_key: String,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub recipients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl From<Message> for MessageDto {
    fn from(message: Message) -> Self {
        Self {
            protocol_version: message.protocol_version,
            message_id: message.message_id.to_string(),
            idempotency_key: message.idempotency_key.to_string(),
            timestamp: message.timestamp,
            sender: message.sender.to_string(),
            recipients: message.recipients.iter().map(ToString::to_string).collect(),
            subject: message.subject,
            schema: message.schema.map(|s| s.to_string()),
            payload: message.payload,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentListDto {
    pub agents: Vec<AgentSummary>,
    pub agent_count: usize,
    pub domain: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAgentDto {
    pub name: String,
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub push_target: Option<String>,
    #[serde(default)]
    pub push_headers: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub supported_schemas: Vec<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterAgentResponseDto {
    pub agent: AgentSummary,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotateKeyResponseDto {
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckRequestDto {
    pub message_id: String,
}
