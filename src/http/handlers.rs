//! Route handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use crate::agent_registry::RegisterAgentRequest;
use crate::error::{GatewayError, GatewayErrorResponse};
use crate::identifiers::{MessageId, SchemaPattern};
use crate::message_manager::SendRequest;

use super::auth::{AdminKey, BearerToken};
use super::dto::{
    AckRequestDto, AgentListDto, HealthDto, MessageDto, MessageStatusDto, RecipientStatusDto,
    RegisterAgentDto, RegisterAgentResponseDto, RotateKeyResponseDto,
};
use super::AppState;

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn check_version_header(headers: &HeaderMap) -> Option<GatewayError> {
    match headers.get("x-amtp-version").and_then(|v| v.to_str().ok()) {
        None | Some("1.0") => None,
        Some(other) => Some(GatewayError::UnsupportedVersion(other.to_string())),
    }
}

pub async fn health() -> impl IntoResponse {
    Json(HealthDto { status: "healthy", version: "1.0" })
}

pub async fn ready() -> impl IntoResponse {
    Json(HealthDto { status: "ready", version: "1.0" })
}

pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<impl IntoResponse, GatewayErrorResponse> {
    let rid = request_id(&headers);
    if let Some(err) = check_version_header(&headers) {
        return Err(GatewayErrorResponse { error: err, request_id: rid });
    }

    let response = state
        .message_manager
        .send(request)
        .await
        .map_err(|err| GatewayErrorResponse {
            error: GatewayError::from(err),
            request_id: rid,
        })?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub async fn get_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayErrorResponse> {
    let rid = request_id(&headers);
    let message_id: MessageId = id.parse().map_err(|_| GatewayErrorResponse {
        error: GatewayError::InvalidRequestFormat("malformed message id".to_string()),
        request_id: rid.clone(),
    })?;
    let message = state
        .message_manager
        .get_message(&message_id)
        .await
        .map_err(|err| GatewayErrorResponse {
            error: GatewayError::from(err),
            request_id: rid,
        })?;
    Ok(Json(MessageDto::from(message)))
}

pub async fn get_message_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayErrorResponse> {
    let rid = request_id(&headers);
    let message_id: MessageId = id.parse().map_err(|_| GatewayErrorResponse {
        error: GatewayError::InvalidRequestFormat("malformed message id".to_string()),
        request_id: rid.clone(),
    })?;
    let status = state
        .message_manager
        .get_message_status(&message_id)
        .await
        .map_err(|err| GatewayErrorResponse {
            error: GatewayError::from(err),
            request_id: rid,
        })?;
    Ok(Json(MessageStatusDto {
        message_id: status.message_id.to_string(),
        recipients: status.recipients.iter().map(RecipientStatusDto::from).collect(),
    }))
}

async fn authorize_inbox(
    state: &AppState,
    recipient: &str,
    token: &BearerToken,
    rid: &str,
) -> Result<(), GatewayErrorResponse> {
    if !state.config.auth.require_auth {
        return Ok(());
    }
    if !state.agent_registry.verify_api_key(recipient, &token.0) {
        return Err(GatewayErrorResponse {
            error: GatewayError::AccessDenied,
            request_id: rid.to_string(),
        });
    }
    state.agent_registry.update_last_access(recipient);
    Ok(())
}

pub async fn get_inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(recipient): Path<String>,
    token: BearerToken,
) -> Result<impl IntoResponse, GatewayErrorResponse> {
    let rid = request_id(&headers);
    authorize_inbox(&state, &recipient, &token, &rid).await?;

    let messages = state.store.inbox_messages(&recipient).await.map_err(|err| {
        GatewayErrorResponse {
            error: GatewayError::Internal(err.to_string()),
            request_id: rid.clone(),
        }
    })?;
    Ok(Json(messages.into_iter().map(MessageDto::from).collect::<Vec<_>>()))
}

pub async fn ack_inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(recipient): Path<String>,
    token: BearerToken,
    Json(body): Json<AckRequestDto>,
) -> Result<impl IntoResponse, GatewayErrorResponse> {
    let rid = request_id(&headers);
    authorize_inbox(&state, &recipient, &token, &rid).await?;

    let message_id: MessageId = body.message_id.parse().map_err(|_| GatewayErrorResponse {
        error: GatewayError::InvalidRequestFormat("malformed message id".to_string()),
        request_id: rid.clone(),
    })?;
    state
        .store
        .ack_inbox(&recipient, &message_id)
        .await
        .map_err(|err| GatewayErrorResponse {
            error: GatewayError::Internal(err.to_string()),
            request_id: rid,
        })?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_discovery_agents(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.agent_registry.list_agents();
    Json(AgentListDto {
        agent_count: agents.len(),
        agents,
        domain: state.config.server.domain.clone(),
        timestamp: Utc::now(),
    })
}

pub async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    _admin: AdminKey,
    Json(request): Json<RegisterAgentDto>,
) -> Result<impl IntoResponse, GatewayErrorResponse> {
    let rid = request_id(&headers);
    let supported_schemas: Vec<SchemaPattern> = request
        .supported_schemas
        .iter()
        .map(|p| SchemaPattern::parse(p))
        .collect::<Result<_, _>>()
        .map_err(|err| GatewayErrorResponse {
            error: GatewayError::InvalidSchemaId(err.to_string()),
            request_id: rid.clone(),
        })?;

    let outcome = state
        .agent_registry
        .register_agent(RegisterAgentRequest {
            name: request.name,
            delivery_mode: request.delivery_mode,
            push_target: request.push_target,
            push_headers: request.push_headers,
            supported_schemas,
            api_key: request.api_key,
        })
        .await
        .map_err(|err| GatewayErrorResponse {
            error: GatewayError::from(err),
            request_id: rid,
        })?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterAgentResponseDto {
            agent: (&outcome.agent).into(),
            api_key: outcome.api_key,
        }),
    ))
}

pub async fn rotate_agent_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    _admin: AdminKey,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, GatewayErrorResponse> {
    let rid = request_id(&headers);
    let api_key = state
        .agent_registry
        .rotate_api_key(&address)
        .map_err(|err| GatewayErrorResponse {
            error: GatewayError::from(err),
            request_id: rid,
        })?;
    Ok(Json(RotateKeyResponseDto { api_key }))
}
