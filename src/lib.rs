//! # AMTP Gateway
//!
//! Core of an agent-to-agent messaging protocol (AMTP) gateway: HTTP message
//! intake, DNS-based peer discovery, AGNTCY schema validation and
//! negotiation, a local agent registry with API-key auth, and multi-recipient
//! delivery orchestration.
//!
//! TLS termination, the outer middleware chain, durable message storage, and
//! metrics backends remain external collaborators; this crate defines their
//! contract traits (`MessageStore`, `MetricsProvider`) and ships an
//! in-process default implementation of each so the crate is runnable
//! standalone.

pub mod agent_registry;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod domain_types;
pub mod error;
pub mod http;
pub mod idempotency;
pub mod identifiers;
pub mod message;
pub mod message_manager;
pub mod metrics;
pub mod orchestrator;
pub mod schema;
pub mod server;
pub mod store;
pub mod time_provider;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayErrorResponse};
pub use message::Message;
pub use message_manager::MessageManager;
