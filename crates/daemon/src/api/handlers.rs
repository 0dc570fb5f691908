/// API request handlers

use super::responses::*;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hiddendrop_common::ClientId;
use hiddendrop_core::{AddressResolver, RelayDispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<RelayDispatcher>,
    pub resolver: Arc<dyn AddressResolver>,
}

/// Handler for GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    debug!("API: GET /api/status");

    let active_transfers = state
        .dispatcher
        .active_transfers()
        .into_iter()
        .map(|(target, status)| TransferInfo {
            target_client_id: target.to_hex(),
            status,
        })
        .collect();

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.dispatcher.session_count().await,
        onion_address: state
            .resolver
            .current_address()
            .map(|address| address.to_hostname()),
        active_transfers,
    }))
}

/// Handler for GET /api/clients
pub async fn get_clients(State(state): State<AppState>) -> Result<Json<ClientsResponse>, AppError> {
    debug!("API: GET /api/clients");

    let clients: Vec<String> = state
        .dispatcher
        .client_ids()
        .await
        .iter()
        .map(ClientId::to_hex)
        .collect();
    let total = clients.len();

    Ok(Json(ClientsResponse { clients, total }))
}

/// Handler for POST /api/transfers
///
/// Validates the request, then runs the send in the background. The outcome
/// is reported through relay events.
pub async fn send_file(
    State(state): State<AppState>,
    Json(request): Json<SendFileRequest>,
) -> Result<(StatusCode, Json<SendFileResponse>), AppError> {
    debug!("API: POST /api/transfers");

    let target: ClientId = request
        .target_client_id
        .parse()
        .map_err(|e| AppError::bad_request(format!("Invalid target client id: {}", e)))?;

    if !state.dispatcher.registry().contains(&target).await {
        return Err(AppError::not_found(format!("Client {} is not connected", target)));
    }

    let path = PathBuf::from(&request.path);
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| AppError::bad_request(format!("Cannot read {}: {}", path.display(), e)))?;
    if !metadata.is_file() {
        return Err(AppError::bad_request(format!("{} is not a file", path.display())));
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let dispatcher = state.dispatcher.clone();
    let task_path = path.clone();
    tokio::spawn(async move {
        match dispatcher.send_file(target, &task_path).await {
            Ok(report) => info!(
                "Sent {} to {} ({} bytes, {} chunks)",
                report.file_name, report.target, report.bytes_sent, report.chunks_sent
            ),
            Err(e) => warn!("Transfer of {} to {} failed: {}", task_path.display(), target, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SendFileResponse {
            target_client_id: target.to_hex(),
            file_name,
            file_size: metadata.len(),
        }),
    ))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    debug!("API: GET /health");
    (StatusCode::OK, "OK")
}

/// Application error type
pub struct AppError {
    message: String,
    status_code: StatusCode,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::NOT_FOUND,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API Error: {}", self.message);

        let body = Json(ErrorResponse::new(
            self.message,
            self.status_code.as_u16(),
        ));

        (self.status_code, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
