//! Top-level error type for the gateway core.
//!
//! Every subsystem defines its own `thiserror` enum; this module composes
//! them into `GatewayError`, which carries the stable wire `ErrorCode` and
//! implements `axum::response::IntoResponse`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent_registry::RegistryError;
use crate::discovery::DiscoveryError;
use crate::orchestrator::OrchestratorError;
use crate::schema::SchemaError;

/// Stable error codes exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequestFormat,
    ValidationFailed,
    SchemaRequired,
    InvalidSchemaId,
    SchemaNotFound,
    SchemaNegotiationFailed,
    PayloadTooLarge,
    UnsupportedVersion,
    AuthenticationRequired,
    AccessDenied,
    MessageNotFound,
    RateLimitExceeded,
    DiscoveryFailed,
    DeliveryTimeout,
    PeerRejected,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidRequestFormat
            | Self::ValidationFailed
            | Self::SchemaRequired
            | Self::InvalidSchemaId
            | Self::SchemaNotFound
            | Self::SchemaNegotiationFailed
            | Self::UnsupportedVersion => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::MessageNotFound => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::DiscoveryFailed | Self::DeliveryTimeout | Self::PeerRejected => {
                StatusCode::BAD_REQUEST
            }
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A single field-level validation detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub field: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The top-level gateway error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request format: {0}")]
    InvalidRequestFormat(String),

    #[error("validation failed")]
    ValidationFailed(Vec<ErrorDetail>),

    #[error("schema required")]
    SchemaRequired,

    #[error("invalid schema id: {0}")]
    InvalidSchemaId(String),

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("schema negotiation failed: {0}")]
    SchemaNegotiationFailed(String),

    #[error("payload too large: {actual} exceeds {max}")]
    PayloadTooLarge { actual: usize, max: usize },

    #[error("unsupported AMTP version: {0}")]
    UnsupportedVersion(String),

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("access denied")]
    AccessDenied,

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("delivery timeout")]
    DeliveryTimeout,

    #[error("peer rejected delivery: {0}")]
    PeerRejected(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequestFormat(_) => ErrorCode::InvalidRequestFormat,
            Self::ValidationFailed(_) => ErrorCode::ValidationFailed,
            Self::SchemaRequired => ErrorCode::SchemaRequired,
            Self::InvalidSchemaId(_) => ErrorCode::InvalidSchemaId,
            Self::SchemaNotFound(_) => ErrorCode::SchemaNotFound,
            Self::SchemaNegotiationFailed(_) => ErrorCode::SchemaNegotiationFailed,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            Self::AuthenticationRequired => ErrorCode::AuthenticationRequired,
            Self::AccessDenied => ErrorCode::AccessDenied,
            Self::MessageNotFound(_) => ErrorCode::MessageNotFound,
            Self::RateLimitExceeded => ErrorCode::RateLimitExceeded,
            Self::DiscoveryFailed(_) => ErrorCode::DiscoveryFailed,
            Self::DeliveryTimeout => ErrorCode::DeliveryTimeout,
            Self::PeerRejected(_) => ErrorCode::PeerRejected,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    #[must_use]
    pub fn details(&self) -> Option<Vec<ErrorDetail>> {
        match self {
            Self::ValidationFailed(details) => Some(details.clone()),
            _ => None,
        }
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(addr) => Self::MessageNotFound(addr),
            RegistryError::Invalid(reason) => {
                Self::ValidationFailed(vec![ErrorDetail {
                    field: "agent".to_string(),
                    code: "INVALID_AGENT".to_string(),
                    message: Some(reason),
                }])
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DiscoveryError> for GatewayError {
    fn from(err: DiscoveryError) -> Self {
        Self::DiscoveryFailed(err.to_string())
    }
}

impl From<SchemaError> for GatewayError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::NotFound(id) => Self::SchemaNotFound(id),
            SchemaError::NegotiationFailed(msg) => Self::SchemaNegotiationFailed(msg),
            SchemaError::InvalidIdentifier(msg) => Self::InvalidSchemaId(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<OrchestratorError> for GatewayError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::GlobalBackpressure => Self::RateLimitExceeded,
            OrchestratorError::Cancelled => Self::DeliveryTimeout,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<crate::message_manager::MessageManagerError> for GatewayError {
    fn from(err: crate::message_manager::MessageManagerError) -> Self {
        use crate::message_manager::MessageManagerError as E;
        match err {
            E::Validation(issues) => Self::ValidationFailed(
                issues
                    .into_iter()
                    .map(|issue| ErrorDetail {
                        field: issue.field,
                        code: issue.code,
                        message: Some(issue.message),
                    })
                    .collect(),
            ),
            E::InvalidField { field, reason } => Self::ValidationFailed(vec![ErrorDetail {
                field,
                code: "INVALID_FIELD".to_string(),
                message: Some(reason),
            }]),
            E::SchemaRequired => Self::SchemaRequired,
            E::Schema(schema_err) => schema_err.into(),
            E::TooLarge { actual, max } => Self::PayloadTooLarge { actual, max },
            E::AgentSchemaMismatch(addresses) => Self::ValidationFailed(
                addresses
                    .into_iter()
                    .map(|address| ErrorDetail {
                        field: "recipients".to_string(),
                        code: "SCHEMA_NOT_SUPPORTED".to_string(),
                        message: Some(address),
                    })
                    .collect(),
            ),
            E::Orchestrator(orchestrator_err) => orchestrator_err.into(),
            E::RateLimited => Self::RateLimitExceeded,
            E::Store(store_err) => Self::Internal(store_err.to_string()),
            E::NotFound(id) => Self::MessageNotFound(id.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorEnvelope,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ErrorDetail>>,
    timestamp: DateTime<Utc>,
    request_id: String,
}

/// Wraps a `GatewayError` with the request id needed to render the wire envelope.
pub struct GatewayErrorResponse {
    pub error: GatewayError,
    pub request_id: String,
}

impl IntoResponse for GatewayErrorResponse {
    fn into_response(self) -> Response {
        let code = self.error.code();
        let status = code.status();
        let body = ErrorBody {
            error: ErrorEnvelope {
                code,
                message: self.error.to_string(),
                details: self.error.details(),
                timestamp: Utc::now(),
                request_id: self.request_id,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_spec_table() {
        assert_eq!(ErrorCode::ValidationFailed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            ErrorCode::AuthenticationRequired.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ErrorCode::AccessDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::MessageNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::RateLimitExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::InternalError.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
