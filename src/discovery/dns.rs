//! DNS TXT resolution backends.

use std::collections::HashMap;

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use thiserror::Error;

/// Errors raised performing a raw TXT lookup, independent of AMTP parsing.
#[derive(Debug, Clone, Error)]
pub enum TxtLookupError {
    #[error("no TXT records found")]
    NoRecords,

    #[error("dns resolution error: {0}")]
    Other(String),
}

/// Abstraction over DNS TXT lookups, so discovery can be tested without
/// real network I/O.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Returns the raw text of every TXT record for `name`.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, TxtLookupError>;
}

/// Production resolver backed by `hickory-resolver`.
pub struct HickoryDnsResolver {
    resolver: TokioResolver,
}

impl HickoryDnsResolver {
    /// Builds a resolver using the system's configured nameservers.
    pub fn from_system_conf() -> Result<Self, TxtLookupError> {
        let resolver = TokioResolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .with_options(ResolverOpts::default())
        .build();
        Ok(Self { resolver })
    }

    /// Builds a resolver from explicit nameserver configuration.
    #[must_use]
    pub fn new(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                .with_options(opts)
                .build(),
        }
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, TxtLookupError> {
        let lookup = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|e| TxtLookupError::Other(e.to_string()))?;
        let records: Vec<String> = lookup
            .iter()
            .map(|txt| {
                txt.iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect();
        if records.is_empty() {
            Err(TxtLookupError::NoRecords)
        } else {
            Ok(records)
        }
    }
}

/// Fixed-mapping resolver for tests and the configured mock mode.
#[derive(Debug, Clone, Default)]
pub struct StaticDnsResolver {
    records: HashMap<String, Vec<String>>,
}

impl StaticDnsResolver {
    #[must_use]
    pub fn new(records: HashMap<String, Vec<String>>) -> Self {
        Self { records }
    }

    pub fn insert(&mut self, domain: impl Into<String>, txt_records: Vec<String>) {
        self.records.insert(domain.into(), txt_records);
    }
}

#[async_trait]
impl DnsResolver for StaticDnsResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, TxtLookupError> {
        self.records
            .get(name)
            .cloned()
            .filter(|records| !records.is_empty())
            .ok_or(TxtLookupError::NoRecords)
    }
}
