/// API Server implementation

use super::handlers::*;
use anyhow::Result;
use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use hiddendrop_core::{AddressResolver, RelayDispatcher};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Local operator API for inspecting the relay and starting sends
pub struct ApiServer {
    listen_addr: SocketAddr,
    state: AppState,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        listen_addr: SocketAddr,
        dispatcher: Arc<RelayDispatcher>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            listen_addr,
            state: AppState {
                dispatcher,
                resolver,
            },
        }
    }

    /// Build the router with all endpoints
    pub fn router(state: AppState) -> Router {
        Router::new()
            // Health check
            .route("/health", get(health_check))
            // Relay endpoints
            .route("/api/status", get(get_status))
            .route("/api/clients", get(get_clients))
            .route("/api/transfers", post(send_file))
            // Browser dashboards may read; only same-origin callers may send
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET]),
            )
            .with_state(state)
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        let app = Self::router(self.state);

        info!("API server starting on {}", self.listen_addr);

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;

        axum::serve(listener, app)
            .await
            .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::responses::{ClientsResponse, StatusResponse};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use hiddendrop_common::RelayConfig;
    use hiddendrop_core::{OnionAddress, ServerEvent};
    use std::io::Write;
    use tower::ServiceExt;

    struct FixedAddress(Option<OnionAddress>);

    impl AddressResolver for FixedAddress {
        fn current_address(&self) -> Option<OnionAddress> {
            self.0.clone()
        }
    }

    fn state() -> AppState {
        AppState {
            dispatcher: Arc::new(RelayDispatcher::new(&RelayConfig::default())),
            resolver: Arc::new(FixedAddress(None)),
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_transfer(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/transfers")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = ApiServer::router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_and_clients() {
        let state = state();
        let (id, _rx) = state.dispatcher.connect().await;

        let status: StatusResponse = body_json(
            ApiServer::router(state.clone())
                .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status.sessions, 1);
        assert!(status.onion_address.is_none());
        assert!(status.active_transfers.is_empty());

        let clients: ClientsResponse = body_json(
            ApiServer::router(state)
                .oneshot(Request::builder().uri("/api/clients").body(Body::empty()).unwrap())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(clients.clients, vec![id.to_hex()]);
        assert_eq!(clients.total, 1);
    }

    #[tokio::test]
    async fn test_send_file_validation() {
        let state = state();
        let (id, _rx) = state.dispatcher.connect().await;

        let bad_id = ApiServer::router(state.clone())
            .oneshot(post_transfer(
                serde_json::json!({"targetClientId": "xyz", "path": "/tmp/x"}),
            ))
            .await
            .unwrap();
        assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);

        let absent = ApiServer::router(state.clone())
            .oneshot(post_transfer(serde_json::json!({
                "targetClientId": hiddendrop_common::ClientId::random().to_hex(),
                "path": "/tmp/x",
            })))
            .await
            .unwrap();
        assert_eq!(absent.status(), StatusCode::NOT_FOUND);

        let dir = tempfile::tempdir().unwrap();
        let missing = ApiServer::router(state)
            .oneshot(post_transfer(serde_json::json!({
                "targetClientId": id.to_hex(),
                "path": dir.path().join("nope.bin").to_string_lossy(),
            })))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_file_accepted() {
        let state = state();
        let (id, mut rx) = state.dispatcher.connect().await;
        assert_eq!(rx.recv().await, Some(ServerEvent::ClientId(id)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();

        let response = ApiServer::router(state)
            .oneshot(post_transfer(serde_json::json!({
                "targetClientId": id.to_hex(),
                "path": file.path().to_string_lossy(),
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.recv().await {
            Some(ServerEvent::TransferRequest(request)) => assert_eq!(request.file_size, 7),
            other => panic!("Expected transfer request, got {:?}", other),
        }
    }
}
