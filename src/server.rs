//! Serving helpers: binding a listener and running the router, with and
//! without graceful shutdown.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;

/// Binds a `TcpListener` on the configured address.
///
/// # Errors
///
/// Returns an error if the server cannot bind to the configured address.
pub async fn bind(config: &GatewayConfig) -> Result<(TcpListener, SocketAddr), std::io::Error> {
    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Binds on any available port (for tests).
///
/// # Errors
///
/// Returns an error if the server cannot bind to any available port.
pub async fn bind_on_available_port() -> Result<(TcpListener, SocketAddr), std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Serves `router` on `listener` until the process is terminated.
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, router).await
}

/// Serves `router` on `listener`, stopping once `shutdown_token` is
/// cancelled.
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> Result<(), std::io::Error> {
    let shutdown_signal = async move {
        shutdown_token.cancelled().await;
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_registry::AgentRegistry;
    use crate::discovery::dns::StaticDnsResolver;
    use crate::discovery::{DiscoveryCache, DiscoveryConfig};
    use crate::domain_types::MessageSizeBytes;
    use crate::http::{build_router, AppState};
    use crate::idempotency::IdempotencyIndex;
    use crate::message_manager::MessageManager;
    use crate::metrics::TracingMetricsProvider;
    use crate::orchestrator::peer_client::MockPeerClient;
    use crate::orchestrator::{DeliveryOrchestrator, OrchestratorConfig};
    use crate::store::{InMemoryMessageStore, MessageStore};
    use crate::time_provider::test_time_provider;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    fn test_state() -> AppState {
        let config = Arc::new(GatewayConfig::testing());
        let time = test_time_provider();
        let discovery = Arc::new(DiscoveryCache::new(
            Arc::new(StaticDnsResolver::new(std::collections::HashMap::new())),
            DiscoveryConfig::default(),
            time.clone(),
        ));
        let agent_registry = Arc::new(AgentRegistry::new(config.server.domain.clone(), None));
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let orchestrator = DeliveryOrchestrator::spawn(
            OrchestratorConfig {
                local_domain: config.server.domain.clone(),
                ..OrchestratorConfig::default()
            },
            discovery,
            agent_registry.clone(),
            Arc::new(MockPeerClient::new()),
            store.clone(),
            Arc::new(TracingMetricsProvider::new()),
            time.clone(),
            1,
            16,
        );
        let idempotency = Arc::new(IdempotencyIndex::new(
            std::time::Duration::from_secs(60),
            time,
        ));
        let message_manager = Arc::new(MessageManager::new(
            config.server.domain.clone(),
            MessageSizeBytes::default_max(),
            None,
            None,
            agent_registry.clone(),
            orchestrator,
            store.clone(),
            idempotency,
        ));
        AppState { config, message_manager, agent_registry, store }
    }

    #[tokio::test]
    async fn bind_on_available_port_returns_localhost_address() {
        let (listener, addr) = bind_on_available_port().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        drop(listener);
    }

    #[tokio::test]
    async fn server_responds_to_health_check() {
        let (listener, addr) = bind_on_available_port().await.unwrap();
        let router = build_router(test_state());
        let server_handle = tokio::spawn(async move { serve(listener, router).await });

        tokio::time::sleep(Duration::from_millis(20)).await;

        let client = reqwest::Client::new();
        let response = timeout(
            Duration::from_secs(1),
            client.get(format!("http://{addr}/health")).send(),
        )
        .await
        .expect("request did not time out")
        .expect("request succeeded");

        assert!(response.status().is_success());
        server_handle.abort();
    }
}
