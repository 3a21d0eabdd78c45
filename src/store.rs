//! External collaborator trait: persistent message storage.
//!
//! The core depends on `MessageStore` only through this trait; an injected
//! implementation owns durability. `InMemoryMessageStore` is the default,
//! in-process implementation used when no external store is configured.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::identifiers::MessageId;
use crate::message::{DeliveryRecord, Message, MessageStatus};

/// Errors raised by a `MessageStore` implementation.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("message not found: {0}")]
    NotFound(MessageId),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Durable storage for messages, their delivery status, and pull-agent
/// inboxes. Out of scope for the core proper; this trait is the
/// contract the core depends on.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn put_message(&self, message: Message) -> Result<(), StoreError>;

    async fn get_message(&self, id: &MessageId) -> Result<Message, StoreError>;

    async fn get_status(&self, id: &MessageId) -> Result<MessageStatus, StoreError>;

    async fn put_delivery_record(
        &self,
        message_id: &MessageId,
        record: DeliveryRecord,
    ) -> Result<(), StoreError>;

    /// Appends `message_id` to `recipient`'s pull inbox.
    async fn enqueue_inbox(&self, recipient: &str, message_id: MessageId) -> Result<(), StoreError>;

    /// Returns the unacknowledged inbox contents for `recipient`.
    async fn inbox_messages(&self, recipient: &str) -> Result<Vec<Message>, StoreError>;

    /// Acknowledges and removes `message_id` from `recipient`'s inbox.
    async fn ack_inbox(&self, recipient: &str, message_id: &MessageId) -> Result<(), StoreError>;
}

/// In-process default: `DashMap`-backed, not durable across restarts.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: DashMap<MessageId, Message>,
    statuses: DashMap<MessageId, MessageStatus>,
    inboxes: DashMap<String, Vec<MessageId>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn put_message(&self, message: Message) -> Result<(), StoreError> {
        let recipients = message
            .recipients
            .iter()
            .map(|r| DeliveryRecord::pending(r.clone(), message.timestamp))
            .collect();
        self.statuses.insert(
            message.message_id,
            MessageStatus {
                message_id: message.message_id,
                recipients,
            },
        );
        self.messages.insert(message.message_id, message);
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.messages
            .get(id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound(*id))
    }

    async fn get_status(&self, id: &MessageId) -> Result<MessageStatus, StoreError> {
        self.statuses
            .get(id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound(*id))
    }

    async fn put_delivery_record(
        &self,
        message_id: &MessageId,
        record: DeliveryRecord,
    ) -> Result<(), StoreError> {
        let mut status = self
            .statuses
            .get_mut(message_id)
            .ok_or(StoreError::NotFound(*message_id))?;
        if let Some(existing) = status
            .recipients
            .iter_mut()
            .find(|r| r.address == record.address)
        {
            *existing = record;
        } else {
            status.recipients.push(record);
        }
        Ok(())
    }

    async fn enqueue_inbox(&self, recipient: &str, message_id: MessageId) -> Result<(), StoreError> {
        self.inboxes
            .entry(recipient.to_string())
            .or_default()
            .push(message_id);
        Ok(())
    }

    async fn inbox_messages(&self, recipient: &str) -> Result<Vec<Message>, StoreError> {
        let Some(ids) = self.inboxes.get(recipient) else {
            return Ok(Vec::new());
        };
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids.iter() {
            if let Some(message) = self.messages.get(id) {
                messages.push(message.clone());
            }
        }
        Ok(messages)
    }

    async fn ack_inbox(&self, recipient: &str, message_id: &MessageId) -> Result<(), StoreError> {
        if let Some(mut ids) = self.inboxes.get_mut(recipient) {
            ids.retain(|id| id != message_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::EmailAddress;
    use crate::identifiers::IdempotencyKey;
    use crate::message::PROTOCOL_VERSION;
    use chrono::Utc;

    fn sample_message() -> Message {
        Message {
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_id: MessageId::generate(),
            idempotency_key: IdempotencyKey::generate(),
            timestamp: Utc::now(),
            sender: EmailAddress::try_new("a@example.com").unwrap(),
            recipients: vec![EmailAddress::try_new("b@example.com").unwrap()],
            subject: None,
            schema: None,
            in_reply_to: None,
            headers: None,
            payload: None,
            coordination: None,
            attachments: None,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryMessageStore::new();
        let message = sample_message();
        store.put_message(message.clone()).await.unwrap();
        let fetched = store.get_message(&message.message_id).await.unwrap();
        assert_eq!(fetched.message_id, message.message_id);
    }

    #[tokio::test]
    async fn inbox_enqueue_and_ack() {
        let store = InMemoryMessageStore::new();
        let message = sample_message();
        store.put_message(message.clone()).await.unwrap();
        store
            .enqueue_inbox("b@example.com", message.message_id)
            .await
            .unwrap();
        let inbox = store.inbox_messages("b@example.com").await.unwrap();
        assert_eq!(inbox.len(), 1);
        store
            .ack_inbox("b@example.com", &message.message_id)
            .await
            .unwrap();
        let inbox = store.inbox_messages("b@example.com").await.unwrap();
        assert!(inbox.is_empty());
    }
}
