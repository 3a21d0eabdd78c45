//! Entry point for the AMTP gateway server.

use std::sync::Arc;

use amtp_gateway::agent_registry::AgentRegistry;
use amtp_gateway::config::{GatewayConfig, RegistryBackendConfig};
use amtp_gateway::discovery::dns::HickoryDnsResolver;
use amtp_gateway::discovery::{DiscoveryCache, DiscoveryConfig};
use amtp_gateway::domain_types::MessageSizeBytes;
use amtp_gateway::http::{build_router, AppState};
use amtp_gateway::idempotency::IdempotencyIndex;
use amtp_gateway::metrics::TracingMetricsProvider;
use amtp_gateway::orchestrator::peer_client::HttpPeerClient;
use amtp_gateway::orchestrator::{DeliveryOrchestrator, OrchestratorConfig};
use amtp_gateway::schema::registry::{
    HttpRegistryClient, LocalFilesystemRegistry, MockRegistryClient, RegistryClient,
};
use amtp_gateway::schema::{CachedRegistryClient, NegotiationEngine, Validator};
use amtp_gateway::store::InMemoryMessageStore;
use amtp_gateway::time_provider::production_time_provider;
use anyhow::Result;
use tracing::info;

fn load_config() -> Result<GatewayConfig> {
    match std::env::var("AMTP_CONFIG_PATH") {
        Ok(path) => Ok(GatewayConfig::from_file(&path)?),
        Err(_) => {
            let config = match std::env::var("AMTP_ENV").as_deref() {
                Ok("production") => GatewayConfig::production(),
                _ => GatewayConfig::development(),
            };
            config.validate()?;
            Ok(config)
        }
    }
}

fn build_registry_backend(config: &GatewayConfig) -> Result<Arc<dyn RegistryClient>> {
    let backend: Arc<dyn RegistryClient> = match &config.registry {
        RegistryBackendConfig::Http { base_url } => Arc::new(HttpRegistryClient::new(base_url.clone())),
        RegistryBackendConfig::Local { base_path } => {
            Arc::new(LocalFilesystemRegistry::open(base_path, true)?)
        }
        RegistryBackendConfig::InMemory => Arc::new(MockRegistryClient::new()),
    };
    Ok(backend)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("amtp_gateway=info".parse()?),
        )
        .init();

    let config = load_config()?;
    info!(domain = %config.server.domain, bind_addr = %config.server.bind_addr, "loaded configuration");

    let time = production_time_provider();

    let dns_resolver = Arc::new(HickoryDnsResolver::from_system_conf()?);
    let discovery = Arc::new(DiscoveryCache::new(
        dns_resolver,
        DiscoveryConfig {
            cache_ttl: std::time::Duration::from_secs(config.dns.cache_ttl_secs),
            timeout: std::time::Duration::from_secs(config.dns.timeout_secs),
            ..DiscoveryConfig::default()
        },
        time.clone(),
    ));

    let schema_backend = build_registry_backend(&config)?;
    let schema_registry: Arc<dyn RegistryClient> = Arc::new(CachedRegistryClient::new(
        schema_backend,
        config.cache.max_size,
        std::time::Duration::from_secs(config.cache.default_ttl_secs),
        time.clone(),
    ));

    let validator = config.validation.enabled.then(|| {
        Arc::new(Validator::new(schema_registry.clone(), config.validation.clone().into()))
    });
    let negotiation = Arc::new(NegotiationEngine::new(
        schema_registry.clone(),
        config.negotiation.enabled,
        config.negotiation.fallback_strategy,
        u64::from(config.negotiation.max_version_drift),
    ));

    let agent_registry = Arc::new(AgentRegistry::new(
        config.server.domain.clone(),
        Some(schema_registry.clone()),
    ));
    let store: Arc<dyn amtp_gateway::store::MessageStore> = Arc::new(InMemoryMessageStore::new());
    let metrics = Arc::new(TracingMetricsProvider::new());
    let peer_client = Arc::new(HttpPeerClient::new());

    let orchestrator = DeliveryOrchestrator::spawn(
        OrchestratorConfig {
            local_domain: config.server.domain.clone(),
            per_peer_concurrency: config.orchestrator.per_peer_concurrency.try_into()?,
            global_concurrency: config.orchestrator.global_concurrency.try_into()?,
            ..OrchestratorConfig::default()
        },
        discovery,
        agent_registry.clone(),
        peer_client,
        store.clone(),
        metrics,
        time.clone(),
        config.orchestrator.worker_count,
        config.orchestrator.queue_capacity,
    );

    let idempotency = Arc::new(IdempotencyIndex::new(config.message.idempotency_ttl(), time));

    let message_manager = Arc::new(amtp_gateway::MessageManager::new(
        config.server.domain.clone(),
        MessageSizeBytes::try_new(config.message.max_size)?,
        validator,
        Some(negotiation),
        agent_registry.clone(),
        orchestrator,
        store.clone(),
        idempotency,
    ));

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        message_manager,
        agent_registry,
        store,
    };

    let router = build_router(state);
    let (listener, addr) = amtp_gateway::server::bind(&config).await?;
    info!(%addr, "amtp gateway listening");

    let shutdown = tokio_util::sync::CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal.cancel();
    });

    amtp_gateway::server::serve_with_graceful_shutdown(listener, router, shutdown).await?;
    info!("amtp gateway shutting down gracefully");
    Ok(())
}
