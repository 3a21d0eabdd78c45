//! Cached registry client wrapper: transparently fetches on
//! miss and stores on success, invalidates on update/delete.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::identifiers::SchemaId;
use crate::time_provider::SharedTimeProvider;

use super::model::{Schema, SchemaStats};
use super::registry::RegistryClient;
use super::{SchemaError, SchemaMetadata};

/// Default schema cache entry TTL: 1 hour.
pub const DEFAULT_SCHEMA_TTL: Duration = Duration::from_secs(60 * 60);

/// Wraps a `RegistryClient` with a TTL + LRU-by-access cache.
pub struct CachedRegistryClient {
    inner: Arc<dyn RegistryClient>,
    cache: Cache<SchemaId, Schema>,
    default_ttl: Duration,
}

impl CachedRegistryClient {
    #[must_use]
    pub fn new(
        inner: Arc<dyn RegistryClient>,
        max_size: usize,
        default_ttl: Duration,
        time: SharedTimeProvider,
    ) -> Self {
        Self {
            inner,
            cache: Cache::new(max_size, default_ttl, time),
            default_ttl,
        }
    }

    /// Explicitly populates the cache, bypassing the backend. `ttl == None`
    /// uses the configured default.
    pub fn set(&self, schema: Schema, ttl: Option<Duration>) {
        self.cache.set(schema.id.clone(), schema, ttl.or(Some(self.default_ttl)));
    }

    /// Removes a single schema's cached value's.
    pub fn invalidate(&self, id: &SchemaId) {
        self.cache.invalidate(id);
    }

    pub fn sweep_expired(&self) {
        self.cache.sweep_expired();
    }
}

#[async_trait]
impl RegistryClient for CachedRegistryClient {
    async fn get_schema(&self, id: &SchemaId) -> Result<Schema, SchemaError> {
        if let Some(schema) = self.cache.get(id) {
            return Ok(schema);
        }
        let _guard = self.cache.single_flight_guard().await;
        if let Some(schema) = self.cache.get(id) {
            return Ok(schema);
        }
        let schema = self.inner.get_schema(id).await?;
        self.cache.set(id.clone(), schema.clone(), Some(self.default_ttl));
        Ok(schema)
    }

    async fn list_schemas(&self, pattern: &str) -> Result<Vec<SchemaId>, SchemaError> {
        self.inner.list_schemas(pattern).await
    }

    async fn register_schema(
        &self,
        schema: Schema,
        metadata: SchemaMetadata,
    ) -> Result<(), SchemaError> {
        self.inner.register_schema(schema, metadata).await
    }

    async fn register_or_update_schema(
        &self,
        schema: Schema,
        metadata: SchemaMetadata,
    ) -> Result<(), SchemaError> {
        let id = schema.id.clone();
        self.inner.register_or_update_schema(schema, metadata).await?;
        self.cache.invalidate(&id);
        Ok(())
    }

    async fn delete_schema(&self, id: &SchemaId) -> Result<(), SchemaError> {
        self.inner.delete_schema(id).await?;
        self.cache.invalidate(id);
        Ok(())
    }

    async fn check_compatibility(
        &self,
        current: &SchemaId,
        new: &SchemaId,
    ) -> Result<bool, SchemaError> {
        self.inner.check_compatibility(current, new).await
    }

    async fn get_stats(&self) -> Result<SchemaStats, SchemaError> {
        self.inner.get_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::registry::MockRegistryClient;
    use crate::time_provider::test_time_provider;
    use chrono::Utc;

    #[tokio::test]
    async fn cache_coherence_after_set_returns_equal_definition() {
        let inner = Arc::new(MockRegistryClient::new());
        let cached = CachedRegistryClient::new(inner, 100, Duration::from_secs(60), test_time_provider());
        let schema = Schema {
            id: SchemaId::new("commerce", "order", 1),
            definition: serde_json::json!({"type": "object"}),
            published_at: Utc::now(),
            signature: None,
        };
        cached.set(schema.clone(), None);
        let fetched = cached.get_schema(&schema.id).await.unwrap();
        assert_eq!(fetched.definition, schema.definition);
    }

    #[tokio::test]
    async fn update_invalidates_cache() {
        let inner = Arc::new(MockRegistryClient::new());
        let cached = CachedRegistryClient::new(inner.clone(), 100, Duration::from_secs(60), test_time_provider());
        let schema = Schema {
            id: SchemaId::new("commerce", "order", 1),
            definition: serde_json::json!({"type": "object"}),
            published_at: Utc::now(),
            signature: None,
        };
        let metadata = SchemaMetadata::from_schema(&schema);
        cached
            .register_schema(schema.clone(), metadata.clone())
            .await
            .unwrap();
        cached.get_schema(&schema.id).await.unwrap();

        let mut updated = schema.clone();
        updated.definition = serde_json::json!({"type": "object", "properties": {}});
        cached
            .register_or_update_schema(updated.clone(), metadata)
            .await
            .unwrap();
        let fetched = cached.get_schema(&schema.id).await.unwrap();
        assert_eq!(fetched.definition, updated.definition);
    }
}
