//! Schema subsystem: identifier-addressed schema documents,
//! a polymorphic registry client, a caching wrapper, version negotiation,
//! and payload validation.

pub mod cache;
pub mod model;
pub mod negotiation;
pub mod registry;
pub mod validator;

pub use cache::CachedRegistryClient;
pub use model::{Schema, SchemaMetadata, SchemaStats};
pub use negotiation::{FallbackStrategy, NegotiationEngine, NegotiationReport};
pub use registry::{
    HttpRegistryClient, LocalFilesystemRegistry, MockRegistryClient, RegistryClient,
};
pub use validator::{ValidationReport, Validator};

use thiserror::Error;

/// Errors raised by the schema subsystem.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("schema not found: {0}")]
    NotFound(String),

    #[error("schema already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid schema: {0}")]
    Invalid(String),

    #[error("invalid schema identifier: {0}")]
    InvalidIdentifier(String),

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("registry io error: {0}")]
    Io(String),

    #[error("registry transport error: {0}")]
    Transport(String),
}
