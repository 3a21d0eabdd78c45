//! Authentication extractors: bearer auth for inbox routes,
//! `X-Admin-Key` for administrative operations.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::{GatewayError, GatewayErrorResponse};

use super::AppState;

fn request_id(parts: &Parts) -> String {
    parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// The bearer token presented on an inbox request, not yet verified against
/// a specific agent (verification needs the path's recipient address, which
/// extractors alone cannot see without duplicating route state).
pub struct BearerToken(pub String);

impl FromRequestParts<AppState> for BearerToken {
    type Rejection = GatewayErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let rid = request_id(parts);
        if !state.config.auth.require_auth {
            return Ok(Self(String::new()));
        }
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GatewayErrorResponse {
                error: GatewayError::AuthenticationRequired,
                request_id: rid.clone(),
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| GatewayErrorResponse {
            error: GatewayError::AuthenticationRequired,
            request_id: rid,
        })?;
        Ok(Self(token.to_string()))
    }
}

/// The admin key presented via `X-Admin-Key`, verified against config.
pub struct AdminKey;

impl FromRequestParts<AppState> for AdminKey {
    type Rejection = GatewayErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let rid = request_id(parts);
        let Some(expected) = &state.config.auth.admin_key else {
            return Ok(Self);
        };
        let provided = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| GatewayErrorResponse {
                error: GatewayError::AuthenticationRequired,
                request_id: rid.clone(),
            })?;
        if provided != expected {
            return Err(GatewayErrorResponse {
                error: GatewayError::AccessDenied,
                request_id: rid,
            });
        }
        Ok(Self)
    }
}
