//! Registry client backends: local filesystem, HTTP remote, in-memory mock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::identifiers::SchemaId;

use super::model::{Schema, SchemaMetadata, SchemaStats};
use super::SchemaError;

/// Polymorphic schema registry client.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn get_schema(&self, id: &SchemaId) -> Result<Schema, SchemaError>;

    /// Returns identifiers whose domain or domain.entity matches `pattern`
    /// (empty pattern matches all), sorted by canonical string.
    async fn list_schemas(&self, pattern: &str) -> Result<Vec<SchemaId>, SchemaError>;

    async fn register_schema(
        &self,
        schema: Schema,
        metadata: SchemaMetadata,
    ) -> Result<(), SchemaError>;

    async fn register_or_update_schema(
        &self,
        schema: Schema,
        metadata: SchemaMetadata,
    ) -> Result<(), SchemaError>;

    async fn delete_schema(&self, id: &SchemaId) -> Result<(), SchemaError>;

    fn validate_schema(&self, schema: &Schema) -> Result<(), SchemaError> {
        if !schema.definition.is_object() && !schema.definition.is_null() {
            return Err(SchemaError::Invalid(
                "schema definition must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    /// Documented over-approximation: same domain+entity is treated as
    /// compatible regardless of structural differences between versions.
    async fn check_compatibility(
        &self,
        current: &SchemaId,
        new: &SchemaId,
    ) -> Result<bool, SchemaError> {
        Ok(current.is_compatible_with(new))
    }

    async fn get_stats(&self) -> Result<SchemaStats, SchemaError>;
}

fn matches_pattern(id: &SchemaId, pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    pattern == id.domain() || pattern == id.domain_entity()
}

fn sorted_matching(ids: impl Iterator<Item = SchemaId>, pattern: &str) -> Vec<SchemaId> {
    let mut matched: Vec<SchemaId> = ids.filter(|id| matches_pattern(id, pattern)).collect();
    matched.sort_by_key(ToString::to_string);
    matched
}

/// In-memory mock backend, for tests and the configured mock registry mode.
#[derive(Debug, Default)]
pub struct MockRegistryClient {
    schemas: DashMap<SchemaId, Schema>,
}

impl MockRegistryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryClient for MockRegistryClient {
    async fn get_schema(&self, id: &SchemaId) -> Result<Schema, SchemaError> {
        self.schemas
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| SchemaError::NotFound(id.to_string()))
    }

    async fn list_schemas(&self, pattern: &str) -> Result<Vec<SchemaId>, SchemaError> {
        Ok(sorted_matching(
            self.schemas.iter().map(|entry| entry.key().clone()),
            pattern,
        ))
    }

    async fn register_schema(
        &self,
        schema: Schema,
        _metadata: SchemaMetadata,
    ) -> Result<(), SchemaError> {
        if self.schemas.contains_key(&schema.id) {
            return Err(SchemaError::AlreadyExists(schema.id.to_string()));
        }
        self.validate_schema(&schema)?;
        self.schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    async fn register_or_update_schema(
        &self,
        schema: Schema,
        _metadata: SchemaMetadata,
    ) -> Result<(), SchemaError> {
        self.validate_schema(&schema)?;
        self.schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    async fn delete_schema(&self, id: &SchemaId) -> Result<(), SchemaError> {
        self.schemas
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchemaError::NotFound(id.to_string()))
    }

    async fn get_stats(&self) -> Result<SchemaStats, SchemaError> {
        Ok(SchemaStats::from_ids(
            self.schemas.iter().map(|e| e.key().clone()).collect::<Vec<_>>().iter(),
        ))
    }
}

/// Local filesystem backend: `<base>/<domain>/<entity>/<version>.json` with
/// a sibling `index.json`.
pub struct LocalFilesystemRegistry {
    base_path: PathBuf,
    auto_save: bool,
    index: RwLock<BTreeMap<SchemaId, SchemaMetadata>>,
    cache: RwLock<BTreeMap<SchemaId, Schema>>,
}

impl LocalFilesystemRegistry {
    /// Initializes from `base_path`, preferring `index.json`; if absent or
    /// unreadable, scans the tree.
    pub fn open(base_path: impl Into<PathBuf>, auto_save: bool) -> Result<Self, SchemaError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| SchemaError::Io(e.to_string()))?;
        let index_path = base_path.join("index.json");
        let index = if let Ok(contents) = std::fs::read_to_string(&index_path) {
            serde_json::from_str::<Vec<SchemaMetadata>>(&contents)
                .ok()
                .map(|entries| entries.into_iter().map(|m| (m.id.clone(), m)).collect())
        } else {
            None
        };
        let index = match index {
            Some(index) => index,
            None => Self::scan_tree(&base_path)?,
        };
        Ok(Self {
            base_path,
            auto_save,
            index: RwLock::new(index),
            cache: RwLock::new(BTreeMap::new()),
        })
    }

    fn scan_tree(base_path: &Path) -> Result<BTreeMap<SchemaId, SchemaMetadata>, SchemaError> {
        let mut found = BTreeMap::new();
        let Ok(domains) = std::fs::read_dir(base_path) else {
            return Ok(found);
        };
        for domain_entry in domains.flatten() {
            if !domain_entry.path().is_dir() {
                continue;
            }
            let Ok(entities) = std::fs::read_dir(domain_entry.path()) else {
                continue;
            };
            for entity_entry in entities.flatten() {
                if !entity_entry.path().is_dir() {
                    continue;
                }
                let Ok(versions) = std::fs::read_dir(entity_entry.path()) else {
                    continue;
                };
                for version_entry in versions.flatten() {
                    let path = version_entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if let Ok(contents) = std::fs::read_to_string(&path) {
                        if let Ok(schema) = serde_json::from_str::<Schema>(&contents) {
                            found.insert(schema.id.clone(), SchemaMetadata::from_schema(&schema));
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    fn schema_path(&self, id: &SchemaId) -> PathBuf {
        self.base_path
            .join(id.domain())
            .join(id.entity())
            .join(format!("v{}.json", id.version()))
    }

    fn flush_index(&self, index: &BTreeMap<SchemaId, SchemaMetadata>) -> Result<(), SchemaError> {
        let entries: Vec<&SchemaMetadata> = index.values().collect();
        let contents =
            serde_json::to_string_pretty(&entries).map_err(|e| SchemaError::Io(e.to_string()))?;
        std::fs::write(self.base_path.join("index.json"), contents)
            .map_err(|e| SchemaError::Io(e.to_string()))
    }

    fn write_schema_file(&self, schema: &Schema) -> Result<(), SchemaError> {
        let path = self.schema_path(&schema.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SchemaError::Io(e.to_string()))?;
        }
        let contents =
            serde_json::to_string_pretty(schema).map_err(|e| SchemaError::Io(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| SchemaError::Io(e.to_string()))
    }

    /// Explicit flush, for when `auto_save` is disabled.
    pub async fn save_to_disk(&self) -> Result<(), SchemaError> {
        let index = self.index.read().await;
        let cache = self.cache.read().await;
        for schema in cache.values() {
            self.write_schema_file(schema)?;
        }
        self.flush_index(&index)
    }
}

#[async_trait]
impl RegistryClient for LocalFilesystemRegistry {
    async fn get_schema(&self, id: &SchemaId) -> Result<Schema, SchemaError> {
        if let Some(schema) = self.cache.read().await.get(id) {
            return Ok(schema.clone());
        }
        let path = self.schema_path(id);
        let contents =
            std::fs::read_to_string(&path).map_err(|_| SchemaError::NotFound(id.to_string()))?;
        let schema: Schema =
            serde_json::from_str(&contents).map_err(|e| SchemaError::Io(e.to_string()))?;
        self.cache.write().await.insert(id.clone(), schema.clone());
        Ok(schema)
    }

    async fn list_schemas(&self, pattern: &str) -> Result<Vec<SchemaId>, SchemaError> {
        let index = self.index.read().await;
        Ok(sorted_matching(index.keys().cloned(), pattern))
    }

    async fn register_schema(
        &self,
        schema: Schema,
        metadata: SchemaMetadata,
    ) -> Result<(), SchemaError> {
        if self.index.read().await.contains_key(&schema.id) {
            return Err(SchemaError::AlreadyExists(schema.id.to_string()));
        }
        self.validate_schema(&schema)?;
        {
            let mut index = self.index.write().await;
            index.insert(schema.id.clone(), metadata);
            self.cache.write().await.insert(schema.id.clone(), schema.clone());
            if self.auto_save {
                self.write_schema_file(&schema)?;
                self.flush_index(&index)?;
            }
        }
        Ok(())
    }

    async fn register_or_update_schema(
        &self,
        schema: Schema,
        metadata: SchemaMetadata,
    ) -> Result<(), SchemaError> {
        self.validate_schema(&schema)?;
        let mut index = self.index.write().await;
        index.insert(schema.id.clone(), metadata);
        self.cache.write().await.insert(schema.id.clone(), schema.clone());
        if self.auto_save {
            self.write_schema_file(&schema)?;
            self.flush_index(&index)?;
        }
        Ok(())
    }

    async fn delete_schema(&self, id: &SchemaId) -> Result<(), SchemaError> {
        let mut index = self.index.write().await;
        if index.remove(id).is_none() {
            return Err(SchemaError::NotFound(id.to_string()));
        }
        self.cache.write().await.remove(id);
        if self.auto_save {
            let _ = std::fs::remove_file(self.schema_path(id));
            self.flush_index(&index)?;
        }
        Ok(())
    }

    async fn get_stats(&self) -> Result<SchemaStats, SchemaError> {
        let index = self.index.read().await;
        Ok(SchemaStats::from_ids(index.keys()))
    }
}

/// HTTP remote backend. Wire format (an Open Question this crate resolves,
/// see `SPEC_FULL.md` §3): `GET/PUT/DELETE /schemas/{id}` exchanging the
/// same JSON shape as the local backend's per-schema file.
pub struct HttpRegistryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistryClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn schema_url(&self, id: &SchemaId) -> String {
        format!("{}/schemas/{}", self.base_url.trim_end_matches('/'), id)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_schema(&self, id: &SchemaId) -> Result<Schema, SchemaError> {
        let response = self
            .client
            .get(self.schema_url(id))
            .send()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SchemaError::NotFound(id.to_string()));
        }
        response
            .error_for_status()
            .map_err(|e| SchemaError::Transport(e.to_string()))?
            .json::<Schema>()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))
    }

    async fn list_schemas(&self, pattern: &str) -> Result<Vec<SchemaId>, SchemaError> {
        let response = self
            .client
            .get(format!("{}/schemas", self.base_url.trim_end_matches('/')))
            .query(&[("pattern", pattern)])
            .send()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))?;
        let ids: Vec<SchemaId> = response
            .error_for_status()
            .map_err(|e| SchemaError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))?;
        Ok(sorted_matching(ids.into_iter(), pattern))
    }

    async fn register_schema(
        &self,
        schema: Schema,
        _metadata: SchemaMetadata,
    ) -> Result<(), SchemaError> {
        let response = self
            .client
            .put(self.schema_url(&schema.id))
            .header("If-None-Match", "*")
            .json(&schema)
            .send()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(SchemaError::AlreadyExists(schema.id.to_string()));
        }
        response
            .error_for_status()
            .map(|_| ())
            .map_err(|e| SchemaError::Transport(e.to_string()))
    }

    async fn register_or_update_schema(
        &self,
        schema: Schema,
        _metadata: SchemaMetadata,
    ) -> Result<(), SchemaError> {
        self.client
            .put(self.schema_url(&schema.id))
            .json(&schema)
            .send()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))?
            .error_for_status()
            .map(|_| ())
            .map_err(|e| SchemaError::Transport(e.to_string()))
    }

    async fn delete_schema(&self, id: &SchemaId) -> Result<(), SchemaError> {
        let response = self
            .client
            .delete(self.schema_url(id))
            .send()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SchemaError::NotFound(id.to_string()));
        }
        response
            .error_for_status()
            .map(|_| ())
            .map_err(|e| SchemaError::Transport(e.to_string()))
    }

    async fn get_stats(&self) -> Result<SchemaStats, SchemaError> {
        let response = self
            .client
            .get(format!("{}/schemas/stats", self.base_url.trim_end_matches('/')))
            .send()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))?;
        response
            .error_for_status()
            .map_err(|e| SchemaError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| SchemaError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_schema(domain: &str, entity: &str, version: u64) -> Schema {
        Schema {
            id: SchemaId::new(domain, entity, version),
            definition: serde_json::json!({"type": "object"}),
            published_at: Utc::now(),
            signature: None,
        }
    }

    #[tokio::test]
    async fn mock_registry_round_trips() {
        let registry = MockRegistryClient::new();
        let schema = sample_schema("commerce", "order", 1);
        let metadata = SchemaMetadata::from_schema(&schema);
        registry
            .register_schema(schema.clone(), metadata)
            .await
            .unwrap();
        let fetched = registry.get_schema(&schema.id).await.unwrap();
        assert_eq!(fetched.checksum(), schema.checksum());
    }

    #[tokio::test]
    async fn mock_registry_rejects_duplicate_register() {
        let registry = MockRegistryClient::new();
        let schema = sample_schema("commerce", "order", 1);
        let metadata = SchemaMetadata::from_schema(&schema);
        registry
            .register_schema(schema.clone(), metadata.clone())
            .await
            .unwrap();
        assert!(matches!(
            registry.register_schema(schema, metadata).await,
            Err(SchemaError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn list_schemas_sorted_and_filtered() {
        let registry = MockRegistryClient::new();
        for (domain, entity, version) in [
            ("commerce", "order", 2),
            ("commerce", "order", 1),
            ("commerce", "invoice", 1),
            ("billing", "invoice", 1),
        ] {
            let schema = sample_schema(domain, entity, version);
            let metadata = SchemaMetadata::from_schema(&schema);
            registry.register_schema(schema, metadata).await.unwrap();
        }
        let all = registry.list_schemas("").await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].to_string() <= w[1].to_string()));

        let commerce_only = registry.list_schemas("commerce").await.unwrap();
        assert_eq!(commerce_only.len(), 3);

        let orders_only = registry.list_schemas("commerce.order").await.unwrap();
        assert_eq!(orders_only.len(), 2);
    }

    #[tokio::test]
    async fn local_filesystem_registry_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let schema = sample_schema("commerce", "order", 1);
        let metadata = SchemaMetadata::from_schema(&schema);
        {
            let registry = LocalFilesystemRegistry::open(dir.path(), true).unwrap();
            registry.register_schema(schema.clone(), metadata).await.unwrap();
        }
        let reopened = LocalFilesystemRegistry::open(dir.path(), true).unwrap();
        let fetched = reopened.get_schema(&schema.id).await.unwrap();
        assert_eq!(fetched.checksum(), schema.checksum());
    }

    #[tokio::test]
    async fn http_registry_fetches_schema_over_the_wire() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let schema = sample_schema("commerce", "order", 1);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schemas/agntcy:commerce.order.v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&schema))
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new(server.uri());
        let fetched = client.get_schema(&schema.id).await.unwrap();
        assert_eq!(fetched.checksum(), schema.checksum());
    }

    #[tokio::test]
    async fn http_registry_maps_404_to_not_found() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schemas/agntcy:commerce.order.v1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpRegistryClient::new(server.uri());
        let id = SchemaId::new("commerce", "order", 1);
        assert!(matches!(client.get_schema(&id).await, Err(SchemaError::NotFound(_))));
    }
}
