//! Identifier utilities: UUIDv7/UUIDv4 generation and validation, and AGNTCY
//! schema identifier parsing.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while parsing or validating identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("malformed uuid: {0}")]
    MalformedUuid(String),

    #[error("expected a UUIDv7 value, got version {0}")]
    NotV7(usize),

    #[error("expected a UUIDv4 value, got version {0}")]
    NotV4(usize),

    #[error("malformed schema identifier: {0}")]
    MalformedSchemaId(String),
}

/// A time-ordered UUIDv7 message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Uuid", into = "Uuid")]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh, time-ordered message id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Validates and wraps an existing UUIDv7 value.
    pub fn try_from_uuid(uuid: Uuid) -> Result<Self, IdentifierError> {
        let version = uuid.get_version_num();
        if version != 7 {
            return Err(IdentifierError::NotV7(version));
        }
        Ok(Self(uuid))
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Extracts the embedded Unix-millisecond timestamp as a UTC time.
    ///
    /// The first 48 bits are treated as a single big-endian integer,
    /// independent of the textual hyphen positions.
    pub fn extract_timestamp(&self) -> Result<DateTime<Utc>, IdentifierError> {
        let bytes = self.0.as_bytes();
        let mut ms_bytes = [0u8; 8];
        ms_bytes[2..8].copy_from_slice(&bytes[0..6]);
        let millis = u64::from_be_bytes(ms_bytes);
        let secs = (millis / 1000) as i64;
        let nanos = ((millis % 1000) * 1_000_000) as u32;
        Utc.timestamp_opt(secs, nanos)
            .single()
            .ok_or_else(|| IdentifierError::MalformedUuid(self.0.to_string()))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s).map_err(|e| IdentifierError::MalformedUuid(e.to_string()))?;
        Self::try_from_uuid(uuid)
    }
}

impl TryFrom<Uuid> for MessageId {
    type Error = IdentifierError;

    fn try_from(value: Uuid) -> Result<Self, Self::Error> {
        Self::try_from_uuid(value)
    }
}

impl From<MessageId> for Uuid {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

/// A client-supplied idempotency key (UUIDv4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Uuid", into = "Uuid")]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    /// Generates a fresh random idempotency key.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validates and wraps an existing UUIDv4 value.
    pub fn try_from_uuid(uuid: Uuid) -> Result<Self, IdentifierError> {
        let version = uuid.get_version_num();
        if version != 4 {
            return Err(IdentifierError::NotV4(version));
        }
        Ok(Self(uuid))
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdempotencyKey {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s).map_err(|e| IdentifierError::MalformedUuid(e.to_string()))?;
        Self::try_from_uuid(uuid)
    }
}

impl TryFrom<Uuid> for IdempotencyKey {
    type Error = IdentifierError;

    fn try_from(value: Uuid) -> Result<Self, Self::Error> {
        Self::try_from_uuid(value)
    }
}

impl From<IdempotencyKey> for Uuid {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

static SCHEMA_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^agntcy:([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)\.v(\d+)$").expect("valid regex")
});

static SCHEMA_PATTERN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^agntcy:([A-Za-z0-9_-]+)(?:\.([A-Za-z0-9_-]+))?\.(?:v(\d+)|\*)$")
        .expect("valid regex")
});

/// A parsed AGNTCY schema identifier: `agntcy:<domain>.<entity>.v<N>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaId {
    domain: String,
    entity: String,
    version: u64,
}

impl SchemaId {
    /// Builds a schema id from already-validated parts.
    #[must_use]
    pub fn new(domain: impl Into<String>, entity: impl Into<String>, version: u64) -> Self {
        Self {
            domain: domain.into(),
            entity: entity.into(),
            version,
        }
    }

    /// Parses the canonical wire form.
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        let caps = SCHEMA_ID_RE
            .captures(input)
            .ok_or_else(|| IdentifierError::MalformedSchemaId(input.to_string()))?;
        let version: u64 = caps[3]
            .parse()
            .map_err(|_| IdentifierError::MalformedSchemaId(input.to_string()))?;
        Ok(Self {
            domain: caps[1].to_string(),
            entity: caps[2].to_string(),
            version,
        })
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn domain_entity(&self) -> String {
        format!("{}.{}", self.domain, self.entity)
    }

    /// Two identifiers are compatible iff they share domain and entity.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.domain == other.domain && self.entity == other.entity
    }

    /// A new identifier with the same domain/entity but a different version.
    #[must_use]
    pub fn with_version(&self, version: u64) -> Self {
        Self {
            domain: self.domain.clone(),
            entity: self.entity.clone(),
            version,
        }
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agntcy:{}.{}.v{}", self.domain, self.entity, self.version)
    }
}

impl FromStr for SchemaId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SchemaId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SchemaId> for String {
    fn from(value: SchemaId) -> Self {
        value.to_string()
    }
}

/// A schema pattern used in agent capability declarations. Unlike
/// `SchemaId`, wildcards (`agntcy:<domain>.*` and `agntcy:<domain>.<entity>.*`)
/// are permitted here but never in a message's schema field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaPattern(String);

impl SchemaPattern {
    /// Parses and validates a capability pattern.
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        if !input.starts_with("agntcy:") || !input.contains('.') {
            return Err(IdentifierError::MalformedSchemaId(input.to_string()));
        }
        if !SCHEMA_PATTERN_RE.is_match(input) {
            return Err(IdentifierError::MalformedSchemaId(input.to_string()));
        }
        Ok(Self(input.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0.ends_with('*')
    }

    /// Returns true for empty `p`, for string equality, for `p == domain`,
    /// or for `p == domain.entity`.
    #[must_use]
    pub fn matches_schema_id(&self, id: &SchemaId) -> bool {
        if self.0.is_empty() {
            return true;
        }
        if self.0 == id.to_string() {
            return true;
        }
        let without_prefix = self.0.trim_start_matches("agntcy:");
        without_prefix == id.domain() || without_prefix == id.domain_entity()
    }

    /// Matches a rendered schema string `M` against this capability pattern
    ///: exact equality, or wildcard-prefix match.
    #[must_use]
    pub fn matches_rendered(&self, rendered: &str) -> bool {
        if let Some(prefix) = self.0.strip_suffix('*') {
            rendered.starts_with(prefix)
        } else {
            self.0 == rendered
        }
    }
}

impl fmt::Display for SchemaPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SchemaPattern {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SchemaPattern> for String {
    fn from(value: SchemaPattern) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_roundtrips_through_string() {
        let id = MessageId::generate();
        let parsed: MessageId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn message_id_rejects_v4() {
        let v4 = Uuid::new_v4();
        assert!(MessageId::try_from_uuid(v4).is_err());
    }

    #[test]
    fn message_id_timestamps_are_monotone_for_sequential_generation() {
        let first = MessageId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = MessageId::generate();
        assert!(first.extract_timestamp().unwrap() <= second.extract_timestamp().unwrap());
    }

    #[test]
    fn idempotency_key_rejects_v7() {
        let v7 = Uuid::now_v7();
        assert!(IdempotencyKey::try_from_uuid(v7).is_err());
    }

    #[test]
    fn schema_id_parse_roundtrip() {
        let id = SchemaId::parse("agntcy:commerce.order.v1").unwrap();
        assert_eq!(id.domain(), "commerce");
        assert_eq!(id.entity(), "order");
        assert_eq!(id.version(), 1);
        assert_eq!(id.to_string(), "agntcy:commerce.order.v1");
    }

    #[test]
    fn schema_id_rejects_malformed() {
        assert!(SchemaId::parse("commerce.order.v1").is_err());
        assert!(SchemaId::parse("agntcy:commerce.order").is_err());
        assert!(SchemaId::parse("agntcy:commerce.order.vX").is_err());
    }

    #[test]
    fn schema_id_compatibility_ignores_version() {
        let a = SchemaId::parse("agntcy:commerce.order.v1").unwrap();
        let b = SchemaId::parse("agntcy:commerce.order.v2").unwrap();
        let c = SchemaId::parse("agntcy:commerce.invoice.v1").unwrap();
        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&c));
    }

    #[test]
    fn schema_pattern_allows_wildcards() {
        assert!(SchemaPattern::parse("agntcy:commerce.*").is_ok());
        assert!(SchemaPattern::parse("agntcy:commerce.order.*").is_ok());
        assert!(SchemaPattern::parse("agntcy:commerce.order.v1").is_ok());
        assert!(SchemaPattern::parse("commerce.order.*").is_err());
    }

    #[test]
    fn schema_pattern_matches_rendered_prefix() {
        let pattern = SchemaPattern::parse("agntcy:commerce.*").unwrap();
        assert!(pattern.matches_rendered("agntcy:commerce.order.v1"));
        assert!(!pattern.matches_rendered("agntcy:billing.invoice.v1"));
    }
}
