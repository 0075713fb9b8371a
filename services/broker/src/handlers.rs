//! Axum handlers for the broker endpoints.
//!
//! The broker's whole job is faithful relaying: upstream verdicts pass
//! through with their status, only transport failures collapse into a
//! generic 500 so the long-lived key and internal addresses never leak.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::state::AppState;

/// Error body shape shared by every endpoint.
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Successful credential response, as minted upstream. The full body passes
/// through untouched; this type documents the field clients rely on.
#[derive(Serialize, ToSchema)]
pub struct TokenResponse {
    /// The short-lived credential value.
    pub value: String,
}

pub enum ApiError {
    BadRequest(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error,
                    details: None,
                }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "The broker could not reach the realtime service.".to_string(),
                        details: None,
                    }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Mint a short-lived realtime credential.
#[utoipa::path(
    get,
    path = "/token",
    responses(
        (status = 200, description = "Credential minted", body = TokenResponse),
        (status = 401, description = "Upstream rejected the long-lived key", body = ErrorResponse),
        (status = 500, description = "Broker could not reach the realtime service", body = ErrorResponse)
    )
)]
pub async fn mint_token(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let (status, body) = state.upstream.mint_credential().await?;
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if code.is_success() {
        info!("minted a session credential");
        return Ok((code, Json(body)).into_response());
    }

    warn!(status, "credential mint rejected upstream");
    let error = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("Failed to generate token")
        .to_string();
    Ok((
        code,
        Json(ErrorResponse {
            error,
            details: Some(body),
        }),
    )
        .into_response())
}

/// Exchange an SDP offer for the remote answer.
#[utoipa::path(
    post,
    path = "/session",
    request_body(content = String, description = "The local SDP offer"),
    responses(
        (status = 200, description = "The remote SDP answer", body = String),
        (status = 400, description = "Empty offer body", body = ErrorResponse),
        (status = 500, description = "Broker could not reach the realtime service", body = ErrorResponse)
    )
)]
pub async fn exchange_session(
    State(state): State<Arc<AppState>>,
    offer: String,
) -> Result<Response, ApiError> {
    if offer.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "An SDP offer body is required.".to_string(),
        ));
    }

    info!(offer_bytes = offer.len(), "forwarding SDP offer upstream");
    let (status, answer) = state.upstream.exchange_offer(offer).await?;
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if !code.is_success() {
        warn!(status, "offer exchange rejected upstream");
    }
    Ok((code, answer).into_response())
}
