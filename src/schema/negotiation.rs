//! Version negotiation: fallback selection when the exact
//! requested schema version is absent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::identifiers::SchemaId;

use super::registry::RegistryClient;
use super::SchemaError;

/// Fallback strategy applied when the exact requested version is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    Latest,
    Previous,
    Fail,
}

/// Outcome of a negotiation attempt, reported back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationReport {
    pub requested: SchemaId,
    pub negotiated: SchemaId,
    pub exact_match: bool,
}

/// Selects the schema version actually used to validate a message.
pub struct NegotiationEngine {
    registry: Arc<dyn RegistryClient>,
    enabled: bool,
    strategy: FallbackStrategy,
    max_version_drift: u64,
}

impl NegotiationEngine {
    #[must_use]
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        enabled: bool,
        strategy: FallbackStrategy,
        max_version_drift: u64,
    ) -> Self {
        Self {
            registry,
            enabled,
            strategy,
            max_version_drift,
        }
    }

    /// Negotiates a concrete, resolvable schema id for `requested`.
    pub async fn negotiate(&self, requested: &SchemaId) -> Result<NegotiationReport, SchemaError> {
        if !self.enabled {
            return Ok(NegotiationReport {
                requested: requested.clone(),
                negotiated: requested.clone(),
                exact_match: true,
            });
        }

        if self.registry.get_schema(requested).await.is_ok() {
            return Ok(NegotiationReport {
                requested: requested.clone(),
                negotiated: requested.clone(),
                exact_match: true,
            });
        }

        let candidates = self
            .registry
            .list_schemas(&requested.domain_entity())
            .await?;

        let negotiated = match self.strategy {
            FallbackStrategy::Latest => Self::highest_version(&candidates),
            FallbackStrategy::Previous => {
                Self::highest_below(&candidates, requested.version())
                    .or_else(|| Self::highest_version(&candidates))
            }
            FallbackStrategy::Fail => None,
        };

        let negotiated = negotiated.ok_or_else(|| {
            SchemaError::NegotiationFailed(format!(
                "no schema available for {}",
                requested.domain_entity()
            ))
        })?;

        self.check_version_drift(requested, &negotiated)?;

        Ok(NegotiationReport {
            requested: requested.clone(),
            negotiated,
            exact_match: false,
        })
    }

    /// Enforces `|requested - negotiated| <= max_drift`.
    pub fn check_version_drift(
        &self,
        requested: &SchemaId,
        negotiated: &SchemaId,
    ) -> Result<(), SchemaError> {
        let drift = requested.version().abs_diff(negotiated.version());
        if drift > self.max_version_drift {
            return Err(SchemaError::NegotiationFailed(format!(
                "version drift {drift} exceeds max {}",
                self.max_version_drift
            )));
        }
        Ok(())
    }

    fn highest_version(candidates: &[SchemaId]) -> Option<SchemaId> {
        candidates.iter().max_by_key(|id| id.version()).cloned()
    }

    fn highest_below(candidates: &[SchemaId], version: u64) -> Option<SchemaId> {
        candidates
            .iter()
            .filter(|id| id.version() < version)
            .max_by_key(|id| id.version())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{Schema, SchemaMetadata};
    use crate::schema::registry::MockRegistryClient;
    use chrono::Utc;

    async fn registry_with_versions(versions: &[u64]) -> Arc<MockRegistryClient> {
        let registry = Arc::new(MockRegistryClient::new());
        for &v in versions {
            let schema = Schema {
                id: SchemaId::new("commerce", "order", v),
                definition: serde_json::json!({}),
                published_at: Utc::now(),
                signature: None,
            };
            let metadata = SchemaMetadata::from_schema(&schema);
            registry.register_schema(schema, metadata).await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn latest_strategy_picks_highest_version() {
        let registry = registry_with_versions(&[1, 2]).await;
        let engine = NegotiationEngine::new(registry, true, FallbackStrategy::Latest, 3);
        let report = engine
            .negotiate(&SchemaId::new("commerce", "order", 3))
            .await
            .unwrap();
        assert_eq!(report.negotiated, SchemaId::new("commerce", "order", 2));
        assert!(!report.exact_match);
    }

    #[tokio::test]
    async fn previous_strategy_falls_back_to_latest_when_none_lower() {
        let registry = registry_with_versions(&[2, 3]).await;
        let engine = NegotiationEngine::new(registry, true, FallbackStrategy::Previous, 3);
        let report = engine
            .negotiate(&SchemaId::new("commerce", "order", 1))
            .await
            .unwrap();
        assert_eq!(report.negotiated, SchemaId::new("commerce", "order", 3));
    }

    #[tokio::test]
    async fn fail_strategy_errors_on_miss() {
        let registry = registry_with_versions(&[1]).await;
        let engine = NegotiationEngine::new(registry, true, FallbackStrategy::Fail, 3);
        assert!(engine
            .negotiate(&SchemaId::new("commerce", "order", 2))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn version_drift_beyond_max_is_rejected() {
        let registry = registry_with_versions(&[10]).await;
        let engine = NegotiationEngine::new(registry, true, FallbackStrategy::Latest, 3);
        assert!(engine
            .negotiate(&SchemaId::new("commerce", "order", 1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn disabled_negotiation_returns_requested_untouched() {
        let registry = registry_with_versions(&[1]).await;
        let engine = NegotiationEngine::new(registry, false, FallbackStrategy::Latest, 3);
        let report = engine
            .negotiate(&SchemaId::new("commerce", "order", 9))
            .await
            .unwrap();
        assert_eq!(report.negotiated, SchemaId::new("commerce", "order", 9));
    }
}
