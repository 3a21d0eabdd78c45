//! Discovery layer: TTL-cached DNS TXT resolution of peer
//! gateway capability records, with single-flight coalescing and a mock
//! mode for tests.

pub mod dns;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::Cache;
use crate::time_provider::SharedTimeProvider;

pub use dns::{DnsResolver, HickoryDnsResolver, StaticDnsResolver, TxtLookupError};

/// The auth scheme a gateway's TXT record advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    None,
    Mtls,
    Bearer,
}

impl std::str::FromStr for AuthScheme {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "mtls" => Ok(Self::Mtls),
            "bearer" => Ok(Self::Bearer),
            other => Err(DiscoveryError::MalformedRecord(format!(
                "unrecognized auth scheme: {other}"
            ))),
        }
    }
}

/// A gateway capability record discovered via DNS TXT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub scheme_version: String,
    pub gateway_url: String,
    pub auth: AuthScheme,
    pub max_size: Option<u64>,
}

impl CapabilityRecord {
    /// Parses `v=amtp1;gateway=<URL>;auth=<scheme>;max-size=<bytes>`,
    /// ignoring unrecognized keys for forward compatibility.
    pub fn parse_txt(record: &str) -> Result<Self, DiscoveryError> {
        let mut fields = record.split(';').map(str::trim);
        let version_field = fields
            .next()
            .ok_or_else(|| DiscoveryError::MalformedRecord(record.to_string()))?;
        let scheme_version = version_field
            .strip_prefix("v=")
            .ok_or_else(|| DiscoveryError::MalformedRecord(record.to_string()))?;
        if scheme_version != "amtp1" {
            return Err(DiscoveryError::UnsupportedScheme(scheme_version.to_string()));
        }

        let mut gateway_url = None;
        let mut auth = AuthScheme::None;
        let mut max_size = None;

        for field in fields {
            if field.is_empty() {
                continue;
            }
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            match key {
                "gateway" => gateway_url = Some(value.to_string()),
                "auth" => auth = value.parse()?,
                "max-size" => max_size = value.parse::<u64>().ok(),
                _ => {} // unknown keys are ignored, not rejected
            }
        }

        let gateway_url = gateway_url.ok_or_else(|| {
            DiscoveryError::MalformedRecord("missing required 'gateway' field".to_string())
        })?;

        Ok(Self {
            scheme_version: scheme_version.to_string(),
            gateway_url,
            auth,
            max_size,
        })
    }
}

/// Errors raised by the discovery layer.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("no AMTP TXT record found for domain")]
    NotFound,

    #[error("malformed AMTP TXT record: {0}")]
    MalformedRecord(String),

    #[error("unsupported AMTP scheme version: {0}")]
    UnsupportedScheme(String),

    #[error("dns lookup failed: {0}")]
    LookupFailed(String),
}

impl From<TxtLookupError> for DiscoveryError {
    fn from(err: TxtLookupError) -> Self {
        match err {
            TxtLookupError::NoRecords => Self::NotFound,
            TxtLookupError::Other(msg) => Self::LookupFailed(msg),
        }
    }
}

/// Configuration for the discovery cache.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub cache_ttl: Duration,
    pub negative_cache_ttl: Duration,
    pub timeout: Duration,
    pub txt_prefixes: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
            negative_cache_ttl: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            txt_prefixes: Vec::new(),
        }
    }
}

#[derive(Clone)]
enum CacheSlot {
    Found(CapabilityRecord),
    NotFound,
}

/// TTL-cached, single-flight-coalesced domain resolver.
pub struct DiscoveryCache {
    cache: Arc<Cache<String, CacheSlot>>,
    resolver: Arc<dyn DnsResolver>,
    config: DiscoveryConfig,
}

impl DiscoveryCache {
    #[must_use]
    pub fn new(
        resolver: Arc<dyn DnsResolver>,
        config: DiscoveryConfig,
        time: SharedTimeProvider,
    ) -> Self {
        Self {
            cache: Arc::new(Cache::new(10_000, config.cache_ttl, time)),
            resolver,
            config,
        }
    }

    /// Resolves a domain's gateway capability record, consulting the cache
    /// first and coalescing concurrent misses via a single-flight guard.
    #[tracing::instrument(skip(self), fields(domain = %domain))]
    pub async fn resolve(&self, domain: &str) -> Result<CapabilityRecord, DiscoveryError> {
        if let Some(slot) = self.cache.get(&domain.to_string()) {
            return match slot {
                CacheSlot::Found(record) => Ok(record),
                CacheSlot::NotFound => Err(DiscoveryError::NotFound),
            };
        }

        let _guard = self.cache.single_flight_guard().await;
        if let Some(slot) = self.cache.get(&domain.to_string()) {
            return match slot {
                CacheSlot::Found(record) => Ok(record),
                CacheSlot::NotFound => Err(DiscoveryError::NotFound),
            };
        }

        let outcome = self.lookup(domain).await;
        match &outcome {
            Ok(record) => {
                self.cache.set(
                    domain.to_string(),
                    CacheSlot::Found(record.clone()),
                    Some(self.config.cache_ttl),
                );
            }
            Err(DiscoveryError::NotFound | DiscoveryError::MalformedRecord(_)) => {
                self.cache.set(
                    domain.to_string(),
                    CacheSlot::NotFound,
                    Some(self.config.negative_cache_ttl),
                );
            }
            Err(_) => {}
        }
        outcome
    }

    async fn lookup(&self, domain: &str) -> Result<CapabilityRecord, DiscoveryError> {
        let names = self.candidate_names(domain);
        let mut last_error = DiscoveryError::NotFound;
        for name in names {
            match self.resolver.lookup_txt(&name).await {
                Ok(records) => {
                    for record in records {
                        if record.starts_with("v=amtp1") {
                            return CapabilityRecord::parse_txt(&record);
                        }
                    }
                }
                Err(err) => last_error = err.into(),
            }
        }
        Err(last_error)
    }

    fn candidate_names(&self, domain: &str) -> Vec<String> {
        if self.config.txt_prefixes.is_empty() {
            vec![domain.to_string()]
        } else {
            self.config
                .txt_prefixes
                .iter()
                .map(|prefix| format!("{prefix}.{domain}"))
                .collect()
        }
    }
}
