//! The `Schema` and `SchemaMetadata` data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::identifiers::SchemaId;

/// An immutable schema document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub id: SchemaId,
    pub definition: serde_json::Value,
    pub published_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Schema {
    /// SHA-256 checksum of the definition bytes.
    #[must_use]
    pub fn checksum(&self) -> String {
        let bytes = serde_json::to_vec(&self.definition).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex_encode(&digest)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Metadata recorded alongside a schema in the local backend's `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub id: SchemaId,
    pub checksum: String,
    pub published_at: DateTime<Utc>,
}

impl SchemaMetadata {
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            id: schema.id.clone(),
            checksum: schema.checksum(),
            published_at: schema.published_at,
        }
    }
}

/// Aggregate stats returned by `GetStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaStats {
    pub total: usize,
    pub by_domain: BTreeMap<String, usize>,
    pub by_entity: BTreeMap<String, usize>,
}

impl SchemaStats {
    pub fn from_ids<'a>(ids: impl Iterator<Item = &'a SchemaId>) -> Self {
        let mut stats = Self::default();
        for id in ids {
            stats.total += 1;
            *stats.by_domain.entry(id.domain().to_string()).or_insert(0) += 1;
            *stats.by_entity.entry(id.entity().to_string()).or_insert(0) += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_for_same_definition() {
        let schema = Schema {
            id: SchemaId::new("commerce", "order", 1),
            definition: serde_json::json!({"type": "object"}),
            published_at: Utc::now(),
            signature: None,
        };
        assert_eq!(schema.checksum(), schema.checksum());
        assert_eq!(schema.checksum().len(), 64);
    }

    #[test]
    fn stats_group_by_domain_and_entity() {
        let ids = vec![
            SchemaId::new("commerce", "order", 1),
            SchemaId::new("commerce", "order", 2),
            SchemaId::new("commerce", "invoice", 1),
        ];
        let stats = SchemaStats::from_ids(ids.iter());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_domain["commerce"], 3);
        assert_eq!(stats.by_entity["order"], 2);
        assert_eq!(stats.by_entity["invoice"], 1);
    }
}
