/// Relay dispatcher for routing signaling events between sessions
///
/// This module is the composition root of the relay:
/// - Session lifecycle (connect, disconnect fan-out)
/// - Discovery (client lists)
/// - Blind forwarding of transfer requests, responses and chunks
/// - Relay-initiated sends through the transfer negotiator
use crate::events::{self, RelayEvent};
use crate::protocol::{
    ClientEvent, ErrorCode, FileChunkMessage, IncomingFileChunk, IncomingTransferRequest,
    IncomingTransferResponse, PeerAddress, ServerEvent, TransferRequestMessage,
    TransferResponseMessage,
};
use crate::session::{SessionHandle, SessionRegistry};
use crate::transfer::{TransferNegotiator, TransferReport, TransferStatus};
use hiddendrop_common::{ClientId, HiddenDropError, RelayConfig, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Relay dispatcher
pub struct RelayDispatcher {
    /// Live sessions
    registry: Arc<SessionRegistry>,

    /// Relay-initiated transfers
    negotiator: Arc<TransferNegotiator>,

    /// Observer events
    events: broadcast::Sender<RelayEvent>,

    /// Outbound queue size for new sessions
    session_buffer: usize,

    /// Longest one delivery waits on a stalled session
    delivery_timeout: Duration,
}

impl RelayDispatcher {
    /// Create a dispatcher with its own registry and negotiator
    pub fn new(config: &RelayConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let events = events::channel();
        let negotiator = Arc::new(TransferNegotiator::from_config(
            registry.clone(),
            events.clone(),
            config,
        ));

        Self {
            registry,
            negotiator,
            events,
            session_buffer: config.session_buffer.max(1),
            delivery_timeout: config.delivery_timeout(),
        }
    }

    /// Subscribe to observer events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Register a new peer and hand back its id plus the outbound queue the
    /// transport must drain
    pub async fn connect(&self) -> (ClientId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.session_buffer);
        let handle = SessionHandle::new(tx).with_delivery_timeout(self.delivery_timeout);
        let id = self.registry.register(handle.clone()).await;

        // Fresh queue, so this cannot block
        if handle.send(ServerEvent::ClientId(id)).await.is_err() {
            warn!("Session {} closed before receiving its id", id);
        }

        info!("Client connected: {}", id);
        events::publish(&self.events, RelayEvent::ClientReady(id));
        (id, rx)
    }

    /// Handle one inbound event from `from`
    pub async fn dispatch(&self, from: ClientId, event: ClientEvent) {
        debug!("Dispatching {} from {}", event.event_name(), from);

        match event {
            ClientEvent::Discover => self.handle_discover(from).await,
            ClientEvent::TransferRequest(request) => {
                self.handle_transfer_request(from, request).await
            }
            ClientEvent::TransferResponse(response) => {
                self.handle_transfer_response(from, response).await
            }
            ClientEvent::FileChunk(chunk) => self.handle_file_chunk(from, chunk).await,
        }
    }

    /// Tell a peer its last frame could not be understood
    pub async fn reject_malformed(&self, from: ClientId, reason: &str) {
        warn!("Malformed message from {}: {}", from, reason);
        self.deliver(
            &from,
            ServerEvent::error(ErrorCode::InvalidMessage, format!("Invalid message: {}", reason)),
        )
        .await;
    }

    /// Remove a peer and notify everyone still connected
    pub async fn disconnect(&self, id: ClientId) {
        if !self.registry.unregister(&id).await {
            debug!("Disconnect for unknown session {}", id);
            return;
        }
        self.negotiator.abandon(&id);
        info!("Client disconnected: {}", id);

        // Fan out over a snapshot; each id is re-resolved on delivery
        let remaining = self.registry.all_ids_except(&id).await;
        let notices = remaining
            .into_iter()
            .map(|peer| (peer, ServerEvent::ClientDisconnected(id)))
            .collect();
        self.deliver_all(notices).await;

        events::publish(&self.events, RelayEvent::ClientDisconnected(id));
    }

    /// Offer a local file to `target` on behalf of the relay
    pub async fn send_file(&self, target: ClientId, path: &Path) -> Result<TransferReport> {
        self.negotiator.send_file(target, path).await
    }

    /// Answer a transfer request a peer addressed to the relay
    pub async fn respond_to_transfer(&self, peer: ClientId, accept: bool) -> Result<()> {
        let handle = self
            .registry
            .lookup(&peer)
            .await
            .ok_or_else(|| HiddenDropError::target_unreachable(peer.to_string()))?;

        handle
            .send(ServerEvent::TransferResponse(IncomingTransferResponse {
                from_client_id: PeerAddress::Relay,
                accept,
            }))
            .await
            .map_err(|_| HiddenDropError::target_unreachable(peer.to_string()))
    }

    /// Push a fresh client list to every session
    pub async fn refresh_clients(&self) {
        let ids = self.registry.all_ids().await;
        let lists = ids
            .iter()
            .map(|id| {
                let others = ids.iter().copied().filter(|other| other != id).collect();
                (*id, ServerEvent::Clients(others))
            })
            .collect();
        self.deliver_all(lists).await;
        debug!("Refreshed client lists for {} sessions", ids.len());
    }

    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn client_ids(&self) -> Vec<ClientId> {
        self.registry.all_ids().await
    }

    pub fn active_transfers(&self) -> Vec<(ClientId, TransferStatus)> {
        self.negotiator.active_transfers()
    }

    /// Handle discover
    async fn handle_discover(&self, from: ClientId) {
        let clients = self.registry.all_ids_except(&from).await;
        debug!("Returning {} clients to {}", clients.len(), from);

        self.deliver(&from, ServerEvent::Clients(clients.clone())).await;
        events::publish(&self.events, RelayEvent::ClientList(clients));
    }

    /// Handle transfer-request: forward, or drop silently if the target is gone
    async fn handle_transfer_request(&self, from: ClientId, request: TransferRequestMessage) {
        let TransferRequestMessage {
            target_client_id,
            metadata,
        } = request;

        let forwarded = match &target_client_id {
            PeerAddress::Client(target) => {
                self.deliver(
                    target,
                    ServerEvent::TransferRequest(IncomingTransferRequest {
                        from_client_id: from.into(),
                        file_name: metadata.name.clone(),
                        file_size: metadata.size,
                    }),
                )
                .await
            }
            PeerAddress::Relay => {
                info!(
                    "{} offers {} ({} bytes) to the relay",
                    from, metadata.name, metadata.size
                );
                true
            }
            PeerAddress::Unknown(_) => false,
        };

        if !forwarded {
            debug!(
                "Dropping transfer-request from {}: target {} unavailable",
                from, target_client_id
            );
            return;
        }

        events::publish(
            &self.events,
            RelayEvent::TransferRequest {
                from,
                file_name: metadata.name,
                file_size: metadata.size,
            },
        );
    }

    /// Handle transfer-response: forward, or report TARGET_UNAVAILABLE
    async fn handle_transfer_response(&self, from: ClientId, response: TransferResponseMessage) {
        let TransferResponseMessage {
            target_client_id,
            accept,
        } = response;

        let delivered = match &target_client_id {
            PeerAddress::Relay => {
                // Late answers to a finished attempt are dropped
                if !self.negotiator.deliver_response(from, accept) {
                    return;
                }
                true
            }
            PeerAddress::Client(target) => {
                self.deliver(
                    target,
                    ServerEvent::TransferResponse(IncomingTransferResponse {
                        from_client_id: from.into(),
                        accept,
                    }),
                )
                .await
            }
            PeerAddress::Unknown(_) => false,
        };

        if !delivered {
            warn!(
                "transfer-response from {} to unavailable target {}",
                from, target_client_id
            );
            self.deliver(
                &from,
                ServerEvent::error(
                    ErrorCode::TargetUnavailable,
                    format!("Target client {} is not connected", target_client_id),
                ),
            )
            .await;
            return;
        }

        let event = if accept {
            RelayEvent::TransferAccepted(from)
        } else {
            RelayEvent::TransferRejected(from)
        };
        events::publish(&self.events, event);
    }

    /// Handle file-chunk: opaque forward, dropped silently if the target is gone
    async fn handle_file_chunk(&self, from: ClientId, message: FileChunkMessage) {
        let FileChunkMessage {
            target_client_id,
            chunk,
        } = message;

        let Some(target) = target_client_id.client() else {
            debug!(
                "Dropping file-chunk from {} addressed to {}",
                from, target_client_id
            );
            return;
        };

        let len = chunk.len();
        let forwarded = self
            .deliver(
                &target,
                ServerEvent::FileChunk(IncomingFileChunk {
                    from_client_id: from.into(),
                    chunk,
                }),
            )
            .await;

        if forwarded {
            debug!("Relayed {} byte chunk {} -> {}", len, from, target);
        } else {
            debug!("Dropping file-chunk from {}: {} unavailable", from, target);
        }
    }

    /// Resolve `to` and queue `event`; false if the session is gone or stalled
    async fn deliver(&self, to: &ClientId, event: ServerEvent) -> bool {
        let Some(handle) = self.registry.lookup(to).await else {
            return false;
        };

        match handle.send(event).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Delivery to {} failed: {}", to, e);
                false
            }
        }
    }

    /// Deliver to several sessions at once, so one stalled peer cannot hold
    /// up the rest
    async fn deliver_all(&self, deliveries: Vec<(ClientId, ServerEvent)>) {
        let mut tasks = Vec::with_capacity(deliveries.len());
        for (to, event) in deliveries {
            let Some(handle) = self.registry.lookup(&to).await else {
                continue;
            };
            tasks.push(tokio::spawn(async move {
                if let Err(e) = handle.send(event).await {
                    debug!("Delivery to {} failed: {}", to, e);
                }
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!("Delivery task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ChunkCipher, TransferKey};
    use crate::protocol::TransferMetadata;
    use std::io::Write;

    fn dispatcher() -> RelayDispatcher {
        RelayDispatcher::new(&RelayConfig::default())
    }

    async fn connect(dispatcher: &RelayDispatcher) -> (ClientId, mpsc::Receiver<ServerEvent>) {
        let (id, mut rx) = dispatcher.connect().await;
        assert_eq!(rx.recv().await, Some(ServerEvent::ClientId(id)));
        (id, rx)
    }

    fn request(target: impl Into<PeerAddress>, name: &str, size: u64) -> ClientEvent {
        ClientEvent::TransferRequest(TransferRequestMessage {
            target_client_id: target.into(),
            metadata: TransferMetadata {
                name: name.into(),
                size,
            },
        })
    }

    fn response(target: impl Into<PeerAddress>, accept: bool) -> ClientEvent {
        ClientEvent::TransferResponse(TransferResponseMessage {
            target_client_id: target.into(),
            accept,
        })
    }

    #[tokio::test]
    async fn test_connect_delivers_id() {
        let dispatcher = dispatcher();
        let (id, _rx) = connect(&dispatcher).await;
        assert_eq!(dispatcher.session_count().await, 1);
        assert_eq!(dispatcher.client_ids().await, vec![id]);
    }

    #[tokio::test]
    async fn test_discover_request_reject_scenario() {
        let dispatcher = dispatcher();
        let (a1, mut a_rx) = connect(&dispatcher).await;
        let (b1, mut b_rx) = connect(&dispatcher).await;

        dispatcher.dispatch(a1, ClientEvent::Discover).await;
        assert_eq!(a_rx.recv().await, Some(ServerEvent::Clients(vec![b1])));

        dispatcher.dispatch(a1, request(b1, "x.txt", 1024)).await;
        assert_eq!(
            b_rx.recv().await,
            Some(ServerEvent::TransferRequest(IncomingTransferRequest {
                from_client_id: a1.into(),
                file_name: "x.txt".into(),
                file_size: 1024,
            }))
        );

        dispatcher.dispatch(b1, response(a1, false)).await;
        assert_eq!(
            a_rx.recv().await,
            Some(ServerEvent::TransferResponse(IncomingTransferResponse {
                from_client_id: b1.into(),
                accept: false,
            }))
        );

        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_to_missing_target_is_silent() {
        let dispatcher = dispatcher();
        let (a1, mut a_rx) = connect(&dispatcher).await;

        dispatcher.dispatch(a1, request(ClientId::random(), "x.txt", 1)).await;
        dispatcher
            .dispatch(a1, request(PeerAddress::parse("garbage"), "x.txt", 1))
            .await;

        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_response_to_missing_target_reports_error() {
        let dispatcher = dispatcher();
        let (b1, mut b_rx) = connect(&dispatcher).await;

        dispatcher.dispatch(b1, response(ClientId::random(), true)).await;

        match b_rx.recv().await {
            Some(ServerEvent::Error(err)) => assert_eq!(err.code, ErrorCode::TargetUnavailable),
            other => panic!("Expected TARGET_UNAVAILABLE, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chunks_forwarded_opaque_and_in_order() {
        let dispatcher = dispatcher();
        let (a1, _a_rx) = connect(&dispatcher).await;
        let (b1, mut b_rx) = connect(&dispatcher).await;

        // Sender-side encryption; the relay only sees the wire bytes
        let key = TransferKey::generate();
        let cipher = ChunkCipher::new(&key);
        let parts: [&[u8]; 3] = [b"first ", b"second ", b"third"];
        for part in parts {
            let wire = cipher.encrypt(part).unwrap().to_bytes();
            dispatcher
                .dispatch(
                    a1,
                    ClientEvent::FileChunk(FileChunkMessage {
                        target_client_id: b1.into(),
                        chunk: wire,
                    }),
                )
                .await;
        }

        let mut reassembled = Vec::new();
        for _ in 0..3 {
            match b_rx.recv().await {
                Some(ServerEvent::FileChunk(chunk)) => {
                    assert_eq!(chunk.from_client_id, PeerAddress::Client(a1));
                    reassembled.extend(cipher.decrypt_wire(&chunk.chunk).unwrap());
                }
                other => panic!("Expected chunk, got {:?}", other),
            }
        }
        assert_eq!(reassembled, b"first second third");
    }

    #[tokio::test]
    async fn test_chunk_to_missing_target_is_silent() {
        let dispatcher = dispatcher();
        let (a1, mut a_rx) = connect(&dispatcher).await;

        dispatcher
            .dispatch(
                a1,
                ClientEvent::FileChunk(FileChunkMessage {
                    target_client_id: ClientId::random().into(),
                    chunk: vec![1, 2, 3],
                }),
            )
            .await;

        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_each_remaining_session_once() {
        let dispatcher = dispatcher();
        let (a1, _a_rx) = connect(&dispatcher).await;
        let (b1, mut b_rx) = connect(&dispatcher).await;
        let (c1, mut c_rx) = connect(&dispatcher).await;

        dispatcher.disconnect(a1).await;
        // A repeated disconnect must not notify again
        dispatcher.disconnect(a1).await;

        assert!(dispatcher.registry().lookup(&a1).await.is_none());
        for rx in [&mut b_rx, &mut c_rx] {
            assert_eq!(rx.recv().await, Some(ServerEvent::ClientDisconnected(a1)));
            assert!(rx.try_recv().is_err());
        }

        dispatcher.dispatch(b1, ClientEvent::Discover).await;
        assert_eq!(b_rx.recv().await, Some(ServerEvent::Clients(vec![c1])));
    }

    #[tokio::test]
    async fn test_closed_session_does_not_affect_others() {
        let dispatcher = dispatcher();
        let (a1, a_rx) = connect(&dispatcher).await;
        let (b1, mut b_rx) = connect(&dispatcher).await;
        drop(a_rx);

        dispatcher.dispatch(b1, request(a1, "x.txt", 3)).await;
        dispatcher.dispatch(b1, ClientEvent::Discover).await;
        assert_eq!(b_rx.recv().await, Some(ServerEvent::Clients(vec![a1])));
    }

    #[tokio::test]
    async fn test_relay_initiated_send_through_dispatch() {
        let dispatcher = Arc::new(dispatcher());
        let (b1, mut b_rx) = connect(&dispatcher).await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello from the relay").unwrap();
        let path = file.path().to_path_buf();

        let sender = dispatcher.clone();
        let task = tokio::spawn(async move { sender.send_file(b1, &path).await });

        match b_rx.recv().await {
            Some(ServerEvent::TransferRequest(req)) => {
                assert_eq!(req.from_client_id, PeerAddress::Relay);
                assert_eq!(req.file_size, 20);
            }
            other => panic!("Expected transfer request, got {:?}", other),
        }
        dispatcher.dispatch(b1, response(PeerAddress::Relay, true)).await;

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.bytes_sent, 20);
        assert!(matches!(b_rx.recv().await, Some(ServerEvent::FileChunk(_))));
        assert!(dispatcher.active_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_relay_initiated_send_to_unknown_target() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .send_file(ClientId::random(), Path::new("/tmp/unused"))
            .await
            .unwrap_err();
        assert!(matches!(err, HiddenDropError::TargetUnreachable(_)));
    }

    #[tokio::test]
    async fn test_disconnect_abandons_pending_attempt() {
        let dispatcher = Arc::new(RelayDispatcher::new(
            &RelayConfig::default().with_negotiation_timeout(Duration::from_secs(30)),
        ));
        let (b1, mut b_rx) = connect(&dispatcher).await;

        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        let sender = dispatcher.clone();
        let task = tokio::spawn(async move { sender.send_file(b1, &path).await });

        assert!(matches!(
            b_rx.recv().await,
            Some(ServerEvent::TransferRequest(_))
        ));
        dispatcher.disconnect(b1).await;

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, HiddenDropError::TargetUnreachable(_)));
    }

    #[tokio::test]
    async fn test_respond_to_transfer_and_refresh() {
        let dispatcher = dispatcher();
        let (a1, mut a_rx) = connect(&dispatcher).await;
        let (b1, mut b_rx) = connect(&dispatcher).await;
        let mut events = dispatcher.subscribe();

        dispatcher.dispatch(a1, request(PeerAddress::Relay, "gift.bin", 9)).await;
        assert!(matches!(
            events.recv().await,
            Ok(RelayEvent::TransferRequest { from, .. }) if from == a1
        ));

        dispatcher.respond_to_transfer(a1, false).await.unwrap();
        assert_eq!(
            a_rx.recv().await,
            Some(ServerEvent::TransferResponse(IncomingTransferResponse {
                from_client_id: PeerAddress::Relay,
                accept: false,
            }))
        );

        dispatcher.refresh_clients().await;
        assert_eq!(a_rx.recv().await, Some(ServerEvent::Clients(vec![b1])));
        assert_eq!(b_rx.recv().await, Some(ServerEvent::Clients(vec![a1])));

        assert!(dispatcher
            .respond_to_transfer(ClientId::random(), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_block_others() {
        let dispatcher = RelayDispatcher::new(
            &RelayConfig::default()
                .with_session_buffer(1)
                .with_delivery_timeout(Duration::from_millis(50)),
        );
        let (a1, _a_rx) = connect(&dispatcher).await;
        // Never drained: the queued client-id fills its only slot
        let (stalled, _stalled_rx) = dispatcher.connect().await;
        let (c1, mut c_rx) = connect(&dispatcher).await;

        let started = std::time::Instant::now();
        dispatcher
            .dispatch(
                a1,
                ClientEvent::FileChunk(FileChunkMessage {
                    target_client_id: stalled.into(),
                    chunk: vec![1, 2, 3],
                }),
            )
            .await;
        dispatcher.disconnect(a1).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(c_rx.recv().await, Some(ServerEvent::ClientDisconnected(a1)));
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_relay_response_publishes_nothing() {
        let dispatcher = dispatcher();
        let (a1, mut a_rx) = connect(&dispatcher).await;
        let mut events = dispatcher.subscribe();

        dispatcher.dispatch(a1, response(PeerAddress::Relay, true)).await;

        assert!(events.try_recv().is_err());
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_message_reply() {
        let dispatcher = dispatcher();
        let (a1, mut a_rx) = connect(&dispatcher).await;

        dispatcher.reject_malformed(a1, "expected value").await;
        match a_rx.recv().await {
            Some(ServerEvent::Error(err)) => assert_eq!(err.code, ErrorCode::InvalidMessage),
            other => panic!("Expected INVALID_MESSAGE, got {:?}", other),
        }
    }
}
