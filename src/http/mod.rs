//! HTTP binding: the axum router and its shared state.
//!
//! TLS termination, CORS, structured rate limiting, and security headers
//! stay outside the core; this module exposes them only as layering points
//! the caller may add around the router `build_router` returns.

pub mod auth;
pub mod dto;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::agent_registry::AgentRegistry;
use crate::config::GatewayConfig;
use crate::message_manager::MessageManager;
use crate::store::MessageStore;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub message_manager: Arc<MessageManager>,
    pub agent_registry: Arc<AgentRegistry>,
    pub store: Arc<dyn MessageStore>,
}

/// Assembles the gateway's axum router covering the message, inbox,
/// discovery, agent, and health routes. The caller is responsible for
/// layering TLS, CORS, and rate limiting.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(handlers::send_message))
        .route("/v1/messages/{id}", get(handlers::get_message))
        .route("/v1/messages/{id}/status", get(handlers::get_message_status))
        .route("/v1/inbox/{recipient}", get(handlers::get_inbox))
        .route("/v1/inbox/{recipient}/ack", post(handlers::ack_inbox))
        .route("/v1/discovery/agents", get(handlers::list_discovery_agents))
        .route("/v1/agents", post(handlers::register_agent))
        .route("/v1/agents/{address}/rotate-key", post(handlers::rotate_agent_key))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::dns::StaticDnsResolver;
    use crate::discovery::{DiscoveryCache, DiscoveryConfig};
    use crate::domain_types::MessageSizeBytes;
    use crate::idempotency::IdempotencyIndex;
    use crate::metrics::TracingMetricsProvider;
    use crate::orchestrator::peer_client::MockPeerClient;
    use crate::orchestrator::{DeliveryOrchestrator, OrchestratorConfig};
    use crate::store::InMemoryMessageStore;
    use crate::time_provider::test_time_provider;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

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
    async fn health_endpoint_reports_healthy() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn send_message_returns_202() {
        let app = build_router(test_state());
        let body = serde_json::json!({
            "sender": "alice@test.local",
            "recipients": ["bob@test.local"],
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn get_unknown_message_returns_404() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/messages/{}", crate::identifiers::MessageId::generate()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inbox_without_auth_header_is_rejected_when_auth_required() {
        let mut state = test_state();
        Arc::get_mut(&mut state.config).unwrap().auth.require_auth = true;
        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/inbox/alice@test.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
