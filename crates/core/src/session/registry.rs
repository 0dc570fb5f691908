/// Session registry: issued client id -> live connection handle
///
/// The only structure shared between connection tasks. One `RwLock` guards
/// the whole map; the workload is lookup-heavy with rare mutation.
use crate::protocol::ServerEvent;
use hiddendrop_common::config::protocol::DELIVERY_TIMEOUT_MS;
use hiddendrop_common::ClientId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Send capability for one connected peer
#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<ServerEvent>,
    delivery_timeout: Duration,
}

impl SessionHandle {
    pub fn new(sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            sender,
            delivery_timeout: Duration::from_millis(DELIVERY_TIMEOUT_MS),
        }
    }

    /// Longest a single send may wait on a full outbound queue
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Queue an event for the peer. Waits while its outbound buffer is full,
    /// but never longer than the delivery timeout.
    pub async fn send(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.sender
            .send_timeout(event, self.delivery_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::Stalled,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Why an event could not be queued for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("session closed")]
    Closed,

    #[error("session stopped reading")]
    Stalled,
}

#[derive(Debug)]
struct SessionEntry {
    handle: SessionHandle,
    /// Registration order, used to keep discovery lists stable
    seq: u64,
}

/// Registry of live sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ClientId, SessionEntry>>,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh random id for `handle` and store the mapping
    pub async fn register(&self, handle: SessionHandle) -> ClientId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write().await;

        let mut id = ClientId::random();
        while sessions.contains_key(&id) {
            warn!("Client id collision on {}, re-rolling", id);
            id = ClientId::random();
        }

        sessions.insert(id, SessionEntry { handle, seq });
        debug!("Registered session {} ({} live)", id, sessions.len());
        id
    }

    /// Find the live handle for `id`, if any
    pub async fn lookup(&self, id: &ClientId) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| entry.handle.clone())
    }

    /// Remove `id`; removing an absent id is a no-op
    pub async fn unregister(&self, id: &ClientId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            debug!("Unregistered session {}", id);
        }
        removed
    }

    /// Point-in-time snapshot of every id except `exclude`, in registration order
    ///
    /// Ids may go stale right after this returns; resolve each through
    /// [`SessionRegistry::lookup`] before delivering to it.
    pub async fn all_ids_except(&self, exclude: &ClientId) -> Vec<ClientId> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<(u64, ClientId)> = sessions
            .iter()
            .filter(|(id, _)| *id != exclude)
            .map(|(id, entry)| (entry.seq, *id))
            .collect();
        drop(sessions);

        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Every live id, in registration order
    pub async fn all_ids(&self) -> Vec<ClientId> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<(u64, ClientId)> =
            sessions.iter().map(|(id, entry)| (entry.seq, *id)).collect();
        drop(sessions);

        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub async fn contains(&self, id: &ClientId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn handle() -> (SessionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (SessionHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        let (h, mut rx) = handle();
        let id = registry.register(h).await;

        assert_eq!(registry.len().await, 1);
        let found = registry.lookup(&id).await.expect("registered id resolves");
        found.send(ServerEvent::ClientId(id)).await.unwrap();
        assert_eq!(rx.recv().await, Some(ServerEvent::ClientId(id)));
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_absent() {
        let registry = SessionRegistry::new();
        assert!(registry.lookup(&ClientId::random()).await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let (h, _rx) = handle();
        let id = registry.register(h).await;

        assert!(registry.unregister(&id).await);
        assert!(!registry.unregister(&id).await);
        assert!(registry.lookup(&id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_all_ids_except_excludes_self_and_removed() {
        let registry = SessionRegistry::new();
        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (h, rx) = handle();
            ids.push(registry.register(h).await);
            receivers.push(rx);
        }

        registry.unregister(&ids[2]).await;
        let others = registry.all_ids_except(&ids[0]).await;

        assert_eq!(others, vec![ids[1], ids[3]]);
        assert_eq!(registry.all_ids().await, vec![ids[0], ids[1], ids[3]]);
    }

    #[tokio::test]
    async fn test_concurrent_register_yields_unique_ids() {
        let registry = Arc::new(SessionRegistry::new());
        let mut tasks = Vec::new();

        for _ in 0..64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                registry.register(SessionHandle::new(tx)).await
            }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            assert!(seen.insert(task.await.unwrap()));
        }
        assert_eq!(registry.len().await, 64);
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver_fails() {
        let registry = SessionRegistry::new();
        let (h, rx) = handle();
        let id = registry.register(h).await;
        drop(rx);

        let found = registry.lookup(&id).await.unwrap();
        assert!(found.is_closed());
        assert_eq!(
            found.send(ServerEvent::Clients(vec![])).await,
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test]
    async fn test_send_to_full_queue_gives_up() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = SessionHandle::new(tx).with_delivery_timeout(Duration::from_millis(20));
        handle.send(ServerEvent::Clients(vec![])).await.unwrap();

        let started = std::time::Instant::now();
        assert_eq!(
            handle.send(ServerEvent::Clients(vec![])).await,
            Err(DeliveryError::Stalled)
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
