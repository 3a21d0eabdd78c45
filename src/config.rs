//! Gateway configuration: a single structured config object with
//! nested per-subsystem keys, plus environment profiles and file loading.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::negotiation::FallbackStrategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    pub domain: String,
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MessageConfig {
    pub max_size: usize,
    pub idempotency_ttl_secs: u64,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_size: crate::domain_types::MessageSizeBytes::default_max().as_usize(),
            idempotency_ttl_secs: 168 * 3600,
        }
    }
}

impl MessageConfig {
    #[must_use]
    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DnsConfig {
    pub cache_ttl_secs: u64,
    pub timeout_secs: u64,
    pub resolvers: Vec<String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 5 * 60,
            timeout_secs: 5,
            resolvers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchemaCacheConfig {
    pub default_ttl_secs: u64,
    pub max_size: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            max_size: crate::domain_types::CacheMaxSize::default().into_inner(),
            cleanup_interval_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NegotiationConfig {
    pub enabled: bool,
    pub fallback_strategy: FallbackStrategy,
    pub max_version_drift: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_strategy: FallbackStrategy::Latest,
            max_version_drift: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    pub enabled: bool,
    pub strict_mode: bool,
    pub allow_unknown_props: bool,
    pub max_payload_size: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let defaults = crate::schema::validator::ValidatorConfig::default();
        Self {
            enabled: defaults.enabled,
            strict_mode: defaults.strict_mode,
            allow_unknown_props: defaults.allow_unknown_props,
            max_payload_size: defaults.max_payload_size,
        }
    }
}

impl From<ValidationConfig> for crate::schema::validator::ValidatorConfig {
    fn from(config: ValidationConfig) -> Self {
        Self {
            enabled: config.enabled,
            strict_mode: config.strict_mode,
            allow_unknown_props: config.allow_unknown_props,
            max_payload_size: config.max_payload_size,
        }
    }
}

/// Registry backend selection: exactly one of a remote base URL
/// (`registry.base_url`) or a local filesystem base path
/// (`local_registry.base_path`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackendConfig {
    Http { base_url: String },
    Local { base_path: String },
    InMemory,
}

impl Default for RegistryBackendConfig {
    fn default() -> Self {
        Self::InMemory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    pub require_auth: bool,
    pub methods: Vec<String>,
    pub admin_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            methods: vec!["bearer".to_string()],
            admin_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfigSection {
    pub per_peer_concurrency: usize,
    pub global_concurrency: usize,
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl Default for OrchestratorConfigSection {
    fn default() -> Self {
        Self {
            per_peer_concurrency: crate::domain_types::PerPeerConcurrency::default().into_inner(),
            global_concurrency: crate::domain_types::GlobalConcurrency::default().into_inner(),
            worker_count: num_cpus::get().max(2),
            queue_capacity: 1024,
        }
    }
}

/// The gateway's full configuration, nested by subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub message: MessageConfig,
    pub dns: DnsConfig,
    pub cache: SchemaCacheConfig,
    pub negotiation: NegotiationConfig,
    pub validation: ValidationConfig,
    pub registry: RegistryBackendConfig,
    pub auth: AuthConfig,
    pub orchestrator: OrchestratorConfigSection,
}

impl GatewayConfig {
    /// A config suited to local development: relaxed auth, in-memory
    /// registry, small concurrency bounds.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.auth.require_auth = false;
        config.orchestrator.worker_count = 2;
        config.orchestrator.global_concurrency = 64;
        config
    }

    /// A config suited to production deployment: strict auth and
    /// validation, higher concurrency bounds.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.auth.require_auth = true;
        config.validation.strict_mode = true;
        config.orchestrator.worker_count = num_cpus::get().max(4);
        config
    }

    /// A config suited to tests: no auth, small bounds, short TTLs.
    #[must_use]
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.auth.require_auth = false;
        config.server.domain = "test.local".to_string();
        config.message.idempotency_ttl_secs = 60;
        config.cache.default_ttl_secs = 5;
        config.orchestrator.worker_count = 1;
        config.orchestrator.global_concurrency = 16;
        config
    }

    /// Validates cross-field invariants that `serde` alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.domain.trim().is_empty() {
            return Err(ConfigError::Invalid("server.domain must not be empty".to_string()));
        }
        if self.message.max_size == 0 {
            return Err(ConfigError::Invalid("message.max_size must be positive".to_string()));
        }
        if self.auth.require_auth && self.auth.methods.is_empty() {
            return Err(ConfigError::Invalid(
                "auth.require_auth is set but auth.methods is empty".to_string(),
            ));
        }
        if let RegistryBackendConfig::Http { base_url } = &self.registry {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::Invalid(
                    "registry.base_url must be an http(s) URL".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Loads a config from a JSON or TOML file, inferred from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source: Box::new(source),
            })?,
            _ => serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source: Box::new(source),
            })?,
        };
        let config: Self = config;
        config.validate()?;
        Ok(config)
    }

    /// Serializes this config back to a JSON or TOML file, inferred from
    /// its extension.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let serialized = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::to_string_pretty(self).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source: Box::new(source),
            })?,
            _ => serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source: Box::new(source),
            })?,
        };
        std::fs::write(path, serialized).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_disables_auth() {
        assert!(!GatewayConfig::development().auth.require_auth);
    }

    #[test]
    fn production_enables_strict_validation() {
        assert!(GatewayConfig::production().validation.strict_mode);
    }

    #[test]
    fn validate_rejects_empty_domain() {
        let mut config = GatewayConfig::testing();
        config.server.domain = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_http_registry_base_url() {
        let mut config = GatewayConfig::testing();
        config.registry = RegistryBackendConfig::Http {
            base_url: "ftp://example.com".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.json");
        let config = GatewayConfig::testing();
        config.save_to_file(&path).expect("save");
        let loaded = GatewayConfig::from_file(&path).expect("load");
        assert_eq!(loaded.server.domain, config.server.domain);
    }

    #[test]
    fn round_trips_through_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.toml");
        let config = GatewayConfig::testing();
        config.save_to_file(&path).expect("save");
        let loaded = GatewayConfig::from_file(&path).expect("load");
        assert_eq!(loaded.orchestrator.worker_count, config.orchestrator.worker_count);
    }
}
