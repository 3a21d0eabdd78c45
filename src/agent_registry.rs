//! Agent registry: local agent records, API-key lifecycle, and
//! schema-capability matching.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifiers::SchemaPattern;
use crate::schema::RegistryClient;

/// How a local agent receives deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Push,
    Pull,
}

/// A registered local agent. The API key is never stored in
/// plaintext; only its argon2 hash is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAgent {
    pub address: String,
    pub delivery_mode: DeliveryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_headers: Option<std::collections::BTreeMap<String, String>>,
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub supported_schemas: Vec<SchemaPattern>,
    pub requires_schema: bool,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// A redacted view of `LocalAgent` for list/diagnostic responses (never
/// includes the API key or its hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub address: String,
    pub delivery_mode: DeliveryMode,
    pub requires_schema: bool,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl From<&LocalAgent> for AgentSummary {
    fn from(agent: &LocalAgent) -> Self {
        Self {
            address: agent.address.clone(),
            delivery_mode: agent.delivery_mode,
            requires_schema: agent.requires_schema,
            created_at: agent.created_at,
            last_access: agent.last_access,
        }
    }
}

/// A registration request.
#[derive(Debug, Clone)]
pub struct RegisterAgentRequest {
    pub name: String,
    pub delivery_mode: DeliveryMode,
    pub push_target: Option<String>,
    pub push_headers: Option<std::collections::BTreeMap<String, String>>,
    pub supported_schemas: Vec<SchemaPattern>,
    pub api_key: Option<String>,
}

/// Errors raised by the agent registry.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent already registered: {0}")]
    AlreadyExists(String),

    #[error("invalid agent registration: {0}")]
    Invalid(String),

    #[error("internal registry error: {0}")]
    Internal(String),
}

static NAME_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._-]{0,62}[A-Za-z0-9])?$").expect("valid regex")
});

/// The outcome of a successful registration: the record plus the one-time
/// plaintext API key.
pub struct RegistrationOutcome {
    pub agent: LocalAgent,
    pub api_key: String,
}

/// Local agent registry, `DashMap`-backed for O(1) lookup.
pub struct AgentRegistry {
    agents: DashMap<String, LocalAgent>,
    local_domain: String,
    schema_registry: Option<Arc<dyn RegistryClient>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new(local_domain: impl Into<String>, schema_registry: Option<Arc<dyn RegistryClient>>) -> Self {
        Self {
            agents: DashMap::new(),
            local_domain: local_domain.into(),
            schema_registry,
        }
    }

    fn qualify(&self, name: &str) -> String {
        format!("{name}@{}", self.local_domain)
    }

    /// Registers a new agent, returning the record and the plaintext API
    /// key exactly once.
    pub async fn register_agent(
        &self,
        request: RegisterAgentRequest,
    ) -> Result<RegistrationOutcome, RegistryError> {
        if request.name.is_empty() || request.name.contains('@') {
            return Err(RegistryError::Invalid(
                "name must be a bare local-part, not a full address".to_string(),
            ));
        }
        if !NAME_RE.is_match(&request.name) {
            return Err(RegistryError::Invalid(format!(
                "name '{}' does not match the required pattern",
                request.name
            )));
        }
        if request.delivery_mode == DeliveryMode::Push && request.push_target.is_none() {
            return Err(RegistryError::Invalid(
                "push delivery mode requires a push_target".to_string(),
            ));
        }

        for pattern in &request.supported_schemas {
            if !pattern.is_wildcard() {
                if let Some(registry) = &self.schema_registry {
                    let id = crate::identifiers::SchemaId::parse(pattern.as_str())
                        .map_err(|e| RegistryError::Invalid(e.to_string()))?;
                    if registry.get_schema(&id).await.is_err() {
                        return Err(RegistryError::Invalid(format!(
                            "unknown exact schema: {pattern}"
                        )));
                    }
                }
            }
        }

        let address = self.qualify(&request.name);
        if self.agents.contains_key(&address) {
            return Err(RegistryError::AlreadyExists(address));
        }

        let (api_key, api_key_hash) = match request.api_key {
            Some(key) => {
                let hash = hash_api_key(&key)?;
                (key, hash)
            }
            None => generate_api_key()?,
        };

        let now = Utc::now();
        let requires_schema = !request.supported_schemas.is_empty();
        let agent = LocalAgent {
            address: address.clone(),
            delivery_mode: request.delivery_mode,
            push_target: request.push_target,
            push_headers: request.push_headers,
            api_key_hash,
            supported_schemas: request.supported_schemas,
            requires_schema,
            created_at: now,
            last_access: now,
        };

        self.agents.insert(address, agent.clone());
        Ok(RegistrationOutcome { agent, api_key })
    }

    pub fn get_agent(&self, address: &str) -> Result<LocalAgent, RegistryError> {
        self.agents
            .get(address)
            .map(|entry| entry.clone())
            .ok_or_else(|| RegistryError::NotFound(address.to_string()))
    }

    pub fn list_agents(&self) -> Vec<AgentSummary> {
        let mut summaries: Vec<AgentSummary> =
            self.agents.iter().map(|entry| AgentSummary::from(entry.value())).collect();
        summaries.sort_by(|a, b| a.address.cmp(&b.address));
        summaries
    }

    pub fn unregister_agent(&self, address: &str) -> Result<(), RegistryError> {
        self.agents
            .remove(address)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(address.to_string()))
    }

    /// Constant-time verification against the stored argon2 hash.
    pub fn verify_api_key(&self, address: &str, key: &str) -> bool {
        let Some(entry) = self.agents.get(address) else {
            return false;
        };
        verify_api_key_hash(&entry.api_key_hash, key)
    }

    /// Generates a new key, atomically replacing the stored hash.
    pub fn rotate_api_key(&self, address: &str) -> Result<String, RegistryError> {
        let mut entry = self
            .agents
            .get_mut(address)
            .ok_or_else(|| RegistryError::NotFound(address.to_string()))?;
        let (new_key, new_hash) = generate_api_key()?;
        entry.api_key_hash = new_hash;
        Ok(new_key)
    }

    /// No-ops for unknown addresses.
    pub fn update_last_access(&self, address: &str) {
        if let Some(mut entry) = self.agents.get_mut(address) {
            entry.last_access = Utc::now();
        }
    }

    /// Schema-capability matching for a message schema `rendered_schema`
    /// (empty string means "no schema set").
    #[must_use]
    pub fn agent_supports_schema(agent: &LocalAgent, rendered_schema: &str) -> bool {
        if !agent.requires_schema {
            return true;
        }
        if rendered_schema.is_empty() {
            return false;
        }
        agent
            .supported_schemas
            .iter()
            .any(|pattern| pattern.matches_rendered(rendered_schema))
    }

    /// Checks feasibility across a recipient set: locally-registered
    /// recipients must accept; unregistered recipients are assumed
    /// acceptable (external forwarding). Returns the addresses that
    /// rejected, if any.
    #[must_use]
    pub fn check_feasibility(&self, local_domain: &str, recipients: &[String], rendered_schema: &str) -> Vec<String> {
        let mut rejected = Vec::new();
        for recipient in recipients {
            if !recipient.ends_with(&format!("@{local_domain}")) {
                continue;
            }
            match self.agents.get(recipient) {
                Some(agent) if !Self::agent_supports_schema(&agent, rendered_schema) => {
                    rejected.push(recipient.clone());
                }
                _ => {}
            }
        }
        rejected
    }
}

fn generate_api_key() -> Result<(String, String), RegistryError> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let key = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_api_key(&key)?;
    Ok((key, hash))
}

fn hash_api_key(key: &str) -> Result<String, RegistryError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(key.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RegistryError::Internal(e.to_string()))
}

fn verify_api_key_hash(hash: &str, key: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default().verify_password(key.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> AgentRegistry {
        AgentRegistry::new("example.com", None)
    }

    #[tokio::test]
    async fn register_rejects_full_address() {
        let reg = registry();
        let req = RegisterAgentRequest {
            name: "alice@example.com".to_string(),
            delivery_mode: DeliveryMode::Pull,
            push_target: None,
            push_headers: None,
            supported_schemas: vec![],
            api_key: None,
        };
        assert!(reg.register_agent(req).await.is_err());
    }

    #[tokio::test]
    async fn register_pull_agent_generates_key_and_qualifies_address() {
        let reg = registry();
        let req = RegisterAgentRequest {
            name: "alice".to_string(),
            delivery_mode: DeliveryMode::Pull,
            push_target: None,
            push_headers: None,
            supported_schemas: vec![],
            api_key: None,
        };
        let outcome = reg.register_agent(req).await.unwrap();
        assert_eq!(outcome.agent.address, "alice@example.com");
        assert_eq!(outcome.api_key.len(), 43);
        assert!(!outcome.agent.requires_schema);
    }

    #[tokio::test]
    async fn push_agent_requires_target() {
        let reg = registry();
        let req = RegisterAgentRequest {
            name: "bob".to_string(),
            delivery_mode: DeliveryMode::Push,
            push_target: None,
            push_headers: None,
            supported_schemas: vec![],
            api_key: None,
        };
        assert!(reg.register_agent(req).await.is_err());
    }

    #[tokio::test]
    async fn verify_api_key_matches_registered_and_rejects_random() {
        let reg = registry();
        let req = RegisterAgentRequest {
            name: "alice".to_string(),
            delivery_mode: DeliveryMode::Pull,
            push_target: None,
            push_headers: None,
            supported_schemas: vec![],
            api_key: None,
        };
        let outcome = reg.register_agent(req).await.unwrap();
        assert!(reg.verify_api_key("alice@example.com", &outcome.api_key));
        assert!(!reg.verify_api_key("alice@example.com", "wrong-key"));
    }

    #[tokio::test]
    async fn rotate_api_key_invalidates_old_key() {
        let reg = registry();
        let req = RegisterAgentRequest {
            name: "alice".to_string(),
            delivery_mode: DeliveryMode::Pull,
            push_target: None,
            push_headers: None,
            supported_schemas: vec![],
            api_key: None,
        };
        let outcome = reg.register_agent(req).await.unwrap();
        let new_key = reg.rotate_api_key("alice@example.com").unwrap();
        assert!(!reg.verify_api_key("alice@example.com", &outcome.api_key));
        assert!(reg.verify_api_key("alice@example.com", &new_key));
    }

    #[test]
    fn agent_supports_schema_without_requirement_accepts_anything() {
        let agent = LocalAgent {
            address: "a@example.com".to_string(),
            delivery_mode: DeliveryMode::Pull,
            push_target: None,
            push_headers: None,
            api_key_hash: String::new(),
            supported_schemas: vec![],
            requires_schema: false,
            created_at: Utc::now(),
            last_access: Utc::now(),
        };
        assert!(AgentRegistry::agent_supports_schema(&agent, ""));
        assert!(AgentRegistry::agent_supports_schema(&agent, "agntcy:commerce.order.v1"));
    }

    #[test]
    fn agent_supports_schema_with_requirement_rejects_empty() {
        let agent = LocalAgent {
            address: "a@example.com".to_string(),
            delivery_mode: DeliveryMode::Pull,
            push_target: None,
            push_headers: None,
            api_key_hash: String::new(),
            supported_schemas: vec![SchemaPattern::parse("agntcy:commerce.*").unwrap()],
            requires_schema: true,
            created_at: Utc::now(),
            last_access: Utc::now(),
        };
        assert!(!AgentRegistry::agent_supports_schema(&agent, ""));
        assert!(AgentRegistry::agent_supports_schema(&agent, "agntcy:commerce.order.v1"));
        assert!(!AgentRegistry::agent_supports_schema(&agent, "agntcy:billing.invoice.v1"));
    }
}
