/// Signaling endpoint exposed through the hidden service
///
/// Every connection gets one socket task and one dispatch task:
/// - the socket task decodes inbound frames and always keeps draining the
///   session's outbound queue, so a slow peer never stalls another session
/// - the dispatch task routes this session's events in arrival order
/// - on close the session is unregistered before the dispatch task is joined

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use hiddendrop_common::config::protocol::MAX_MESSAGE_SIZE;
use hiddendrop_common::ClientId;
use hiddendrop_core::{ClientEvent, MessageCodec, RelayDispatcher};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::handlers::health_check;

/// Inbound frames buffered between the socket and dispatch tasks
const INBOUND_BUFFER: usize = 64;

enum Inbound {
    Event(ClientEvent),
    Malformed(String),
}

/// WebSocket relay server
pub struct RelayServer {
    listen_addr: SocketAddr,
    dispatcher: Arc<RelayDispatcher>,
}

impl RelayServer {
    pub fn new(listen_addr: SocketAddr, dispatcher: Arc<RelayDispatcher>) -> Self {
        Self {
            listen_addr,
            dispatcher,
        }
    }

    pub fn router(dispatcher: Arc<RelayDispatcher>) -> Router {
        Router::new()
            .route("/socket", get(socket_handler))
            .route("/health", get(health_check))
            .with_state(dispatcher)
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = Self::router(self.dispatcher);

        info!("Relay listening on {}", self.listen_addr);
        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Relay server error: {}", e))?;

        Ok(())
    }
}

async fn socket_handler(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Arc<RelayDispatcher>>,
) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, dispatcher))
}

async fn handle_socket(mut socket: WebSocket, dispatcher: Arc<RelayDispatcher>) {
    let (id, mut outbound) = dispatcher.connect().await;
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    let worker = tokio::spawn(dispatch_loop(dispatcher.clone(), id, inbound_rx));

    // Holds a decoded frame until the dispatch task has room for it
    let mut pending: Option<Inbound> = None;

    loop {
        tokio::select! {
            permit = inbound_tx.reserve(), if pending.is_some() => {
                let Ok(permit) = permit else { break };
                if let Some(frame) = pending.take() {
                    permit.send(frame);
                }
            }
            frame = socket.recv(), if pending.is_none() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        pending = Some(match MessageCodec::decode::<ClientEvent>(&text) {
                            Ok(event) => Inbound::Event(event),
                            Err(e) => Inbound::Malformed(e.to_string()),
                        });
                    }
                    Some(Ok(Message::Binary(_))) => {
                        pending = Some(Inbound::Malformed("binary frames are not supported".into()));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Socket error for {}: {}", id, e);
                        break;
                    }
                }
            }
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let text = match MessageCodec::encode(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {} for {}: {}", event.event_name(), id, e);
                        continue;
                    }
                };
                if let Err(e) = socket.send(Message::Text(text)).await {
                    debug!("Send to {} failed: {}", id, e);
                    break;
                }
            }
        }
    }

    // Deliveries to this session fail fast from here on
    drop(outbound);
    drop(inbound_tx);
    close_session(&dispatcher, id, worker).await;
}

/// Unregister first, so a worker still flushing frames to a slow peer
/// cannot keep a closed session visible to discovery
async fn close_session(dispatcher: &RelayDispatcher, id: ClientId, worker: JoinHandle<()>) {
    dispatcher.disconnect(id).await;
    if let Err(e) = worker.await {
        warn!("Dispatch task for {} ended abnormally: {}", id, e);
    }
}

async fn dispatch_loop(
    dispatcher: Arc<RelayDispatcher>,
    id: ClientId,
    mut inbound: mpsc::Receiver<Inbound>,
) {
    while let Some(frame) = inbound.recv().await {
        match frame {
            Inbound::Event(event) => dispatcher.dispatch(id, event).await,
            Inbound::Malformed(reason) => dispatcher.reject_malformed(id, &reason).await,
        }
    }
}
