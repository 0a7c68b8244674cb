//! API request handlers
//!
//! Handlers for all REST API endpoints.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::core::formula::is_cell_identifier;
use crate::core::{CellSubscription, WriteOutcome};
use crate::error::StoreError;
use crate::types::{CellResponse, SheetResponse, SubscribeResponse, UpsertRequest};

use super::server::AppState;

/// Error body for non-2xx responses
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Everything a handler can fail with
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid cell id {0:?}")]
    InvalidCellId(String),

    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCellId(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound { .. })
            | ApiError::Store(StoreError::UnknownSubscription(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(error = %self, "request rejected");
        }

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn ensure_cell_id(cell_id: &str) -> Result<(), ApiError> {
    if is_cell_identifier(cell_id) {
        Ok(())
    } else {
        Err(ApiError::InvalidCellId(cell_id.to_string()))
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health - Health check
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
    })
}

/// GET /api/v1/:sheet_id - Every cell of a sheet
pub async fn get_sheet(
    State(state): State<Arc<AppState>>,
    Path(sheet_id): Path<String>,
) -> Result<Json<SheetResponse>, ApiError> {
    let cancel = state.shutdown.child_token();
    let sheet = state.engine.get_sheet(&sheet_id, &cancel).await?;
    Ok(Json(sheet))
}

/// GET /api/v1/:sheet_id/:cell_id - One resolved cell
pub async fn get_cell(
    State(state): State<Arc<AppState>>,
    Path((sheet_id, cell_id)): Path<(String, String)>,
) -> Result<Json<CellResponse>, ApiError> {
    ensure_cell_id(&cell_id)?;

    let cancel = state.shutdown.child_token();
    let cell = state.engine.get_cell(&sheet_id, &cell_id, &cancel).await?;
    Ok(Json(cell))
}

/// POST /api/v1/:sheet_id/:cell_id - Write a cell
///
/// 201 when committed, 422 when the value or one of its dependents would
/// not compute.
pub async fn upsert_cell(
    State(state): State<Arc<AppState>>,
    Path((sheet_id, cell_id)): Path<(String, String)>,
    payload: Result<Json<UpsertRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CellResponse>), ApiError> {
    ensure_cell_id(&cell_id)?;
    let Json(request) = payload?;

    let cancel = state.shutdown.child_token();
    let outcome = state
        .engine
        .upsert(&sheet_id, &cell_id, &request.value, &cancel)
        .await?;

    Ok(match outcome {
        WriteOutcome::Committed(cell) => (StatusCode::CREATED, Json(cell)),
        WriteOutcome::Rejected(cell) => (StatusCode::UNPROCESSABLE_ENTITY, Json(cell)),
    })
}

/// POST /api/v1/:sheet_id/:cell_id/subscribe - Create a subscription
pub async fn subscribe_cell(
    State(state): State<Arc<AppState>>,
    Path((sheet_id, cell_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<SubscribeResponse>), ApiError> {
    ensure_cell_id(&cell_id)?;

    let cancel = state.shutdown.child_token();
    let subscription_id = state
        .engine
        .create_subscription(&sheet_id, &cell_id, &cancel)
        .await?;

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(&state.public_host);
    let webhook_url = format!("http://{}/api/v1/sub/{}", host, subscription_id);

    Ok((StatusCode::CREATED, Json(SubscribeResponse { webhook_url })))
}

/// GET /api/v1/sub/:subscription_id - Newline-delimited JSON feed
///
/// One line per change of the watched cell. The feed ends when the client
/// goes away, the server shuts down or the transport fails.
pub async fn subscription_feed(
    State(state): State<Arc<AppState>>,
    Path(subscription_id): Path<String>,
) -> Result<Response, ApiError> {
    let cancel = state.shutdown.child_token();
    let subscription = state
        .engine
        .open_subscription(&subscription_id, &cancel)
        .await?;

    let lines = stream::unfold(subscription, |mut subscription: CellSubscription| async move {
        let update = match subscription.next_update().await {
            Ok(update) => update,
            Err(err) => {
                info!(
                    cell = %subscription.record().cell_id,
                    reason = %err,
                    "subscription feed ended"
                );
                return None;
            }
        };

        match serde_json::to_vec(&update) {
            Ok(mut line) => {
                line.push(b'\n');
                Some((Ok::<_, std::io::Error>(line), subscription))
            }
            Err(err) => {
                warn!(error = %err, "failed to encode update");
                None
            }
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}
