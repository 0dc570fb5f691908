/// Relay-initiated file transfers
///
/// The relay offers a local file to one connected peer, waits (bounded) for
/// its answer and, on accept, streams the file as independently encrypted
/// chunks. Transfers between two peers never come through here; the
/// dispatcher forwards those blindly.
use crate::events::{self, RelayEvent};
use crate::protocol::{
    IncomingFileChunk, IncomingTransferRequest, PeerAddress, ServerEvent, TransferMetadata,
};
use crate::session::{DeliveryError, SessionHandle, SessionRegistry};
use crate::transfer::attempt::{TransferAttempt, TransferStatus};
use hiddendrop_common::{ClientId, HiddenDropError, RelayConfig, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

type PendingResponses = Arc<Mutex<HashMap<ClientId, oneshot::Sender<bool>>>>;
type ActiveTransfers = Arc<Mutex<HashMap<ClientId, TransferStatus>>>;

/// Outcome of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub target: ClientId,
    pub file_name: String,
    pub bytes_sent: u64,
    pub chunks_sent: u64,
}

/// Keeps one attempt's response listener and status entry alive.
///
/// Dropping the guard removes both, on every exit path.
struct AttemptGuard {
    target: ClientId,
    pending: PendingResponses,
    active: ActiveTransfers,
}

impl AttemptGuard {
    fn set_status(&self, status: TransferStatus) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.target, status);
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.target);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.target);
    }
}

pub struct TransferNegotiator {
    registry: Arc<SessionRegistry>,
    pending: PendingResponses,
    active: ActiveTransfers,
    events: broadcast::Sender<RelayEvent>,
    response_timeout: Duration,
    chunk_size: usize,
}

impl TransferNegotiator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        events: broadcast::Sender<RelayEvent>,
        response_timeout: Duration,
        chunk_size: usize,
    ) -> Self {
        Self {
            registry,
            pending: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(Mutex::new(HashMap::new())),
            events,
            response_timeout,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(
        registry: Arc<SessionRegistry>,
        events: broadcast::Sender<RelayEvent>,
        config: &RelayConfig,
    ) -> Self {
        Self::new(
            registry,
            events,
            config.negotiation_timeout(),
            config.chunk_size,
        )
    }

    /// Offer the file at `path` to `target` and stream it if accepted
    pub async fn send_file(&self, target: ClientId, path: &Path) -> Result<TransferReport> {
        // Unknown targets fail before any file access or timer
        let handle = self
            .registry
            .lookup(&target)
            .await
            .ok_or_else(|| HiddenDropError::target_unreachable(target.to_string()))?;

        let mut file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                HiddenDropError::protocol(format!("{} has no file name", path.display()))
            })?;

        let (guard, response) = self.begin_attempt(target)?;
        let mut attempt = TransferAttempt::new(
            target,
            TransferMetadata {
                name: file_name,
                size: file_size,
            },
        );

        info!(
            "Offering {} ({} bytes) to {}",
            attempt.metadata().name,
            file_size,
            target
        );

        let outcome = self
            .negotiate(&guard, &mut attempt, &handle, response, &mut file)
            .await;

        match outcome {
            Ok(()) => {
                attempt.advance(TransferStatus::Completed)?;
                self.publish_status(&guard, TransferStatus::Completed);
                info!(
                    "Transfer to {} completed: {} bytes in {} chunks",
                    target,
                    attempt.bytes_sent(),
                    attempt.chunks_sent()
                );
                Ok(TransferReport {
                    target,
                    file_name: attempt.metadata().name.clone(),
                    bytes_sent: attempt.bytes_sent(),
                    chunks_sent: attempt.chunks_sent(),
                })
            }
            Err(e) => {
                let status = match e {
                    HiddenDropError::TransferRejected => TransferStatus::Rejected,
                    _ => TransferStatus::Failed,
                };
                attempt.advance(status)?;
                self.publish_status(&guard, status);
                warn!("Transfer to {} ended as {}: {}", target, status, e);
                Err(e)
            }
        }
    }

    /// Offer, wait for the answer, then stream
    ///
    /// Queuing the request and waiting for the answer share one deadline, so
    /// a peer that stopped reading cannot hold the attempt open.
    async fn negotiate(
        &self,
        guard: &AttemptGuard,
        attempt: &mut TransferAttempt,
        handle: &SessionHandle,
        response: oneshot::Receiver<bool>,
        file: &mut File,
    ) -> Result<()> {
        let target = attempt.target();
        let deadline = Instant::now() + self.response_timeout;

        let offer = handle.send(ServerEvent::TransferRequest(IncomingTransferRequest {
            from_client_id: PeerAddress::Relay,
            file_name: attempt.metadata().name.clone(),
            file_size: attempt.metadata().size,
        }));
        match tokio::time::timeout_at(deadline, offer).await {
            Ok(Ok(())) => {}
            Ok(Err(DeliveryError::Closed)) => {
                return Err(HiddenDropError::target_unreachable(target.to_string()))
            }
            Ok(Err(DeliveryError::Stalled)) | Err(_) => {
                debug!("{} did not take the transfer request in time", target);
                return Err(HiddenDropError::NegotiationTimeout);
            }
        }
        self.publish_status(guard, TransferStatus::Requested);

        self.await_response(target, response, deadline).await?;
        attempt.advance(TransferStatus::Accepted)?;
        self.publish_status(guard, TransferStatus::Accepted);

        self.stream_file(guard, attempt, file).await
    }

    /// Route a peer's answer to a waiting attempt. Returns false when no
    /// attempt is waiting on that peer.
    pub fn deliver_response(&self, from: ClientId, accept: bool) -> bool {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&from);

        match waiter {
            Some(tx) => tx.send(accept).is_ok(),
            None => {
                debug!("No transfer waiting on {}, dropping response", from);
                false
            }
        }
    }

    /// Abandon a waiting attempt because its target went away
    pub fn abandon(&self, target: &ClientId) -> bool {
        let dropped = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target)
            .is_some();
        if dropped {
            debug!("Abandoned pending transfer to {}", target);
        }
        dropped
    }

    pub fn is_waiting_on(&self, target: &ClientId) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(target)
    }

    /// Relay-initiated attempts that have not reached a terminal state
    pub fn active_transfers(&self) -> Vec<(ClientId, TransferStatus)> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, status)| (*id, *status))
            .collect()
    }

    fn begin_attempt(&self, target: ClientId) -> Result<(AttemptGuard, oneshot::Receiver<bool>)> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.contains_key(&target) {
            return Err(HiddenDropError::AttemptInProgress(target.to_string()));
        }
        active.insert(target, TransferStatus::Requested);

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, tx);
        drop(active);

        Ok((
            AttemptGuard {
                target,
                pending: self.pending.clone(),
                active: self.active.clone(),
            },
            rx,
        ))
    }

    async fn await_response(
        &self,
        target: ClientId,
        response: oneshot::Receiver<bool>,
        deadline: Instant,
    ) -> Result<()> {
        match tokio::time::timeout_at(deadline, response).await {
            Err(_) => Err(HiddenDropError::NegotiationTimeout),
            Ok(Err(_)) => Err(HiddenDropError::target_unreachable(target.to_string())),
            Ok(Ok(false)) => Err(HiddenDropError::TransferRejected),
            Ok(Ok(true)) => Ok(()),
        }
    }

    async fn stream_file(
        &self,
        guard: &AttemptGuard,
        attempt: &mut TransferAttempt,
        file: &mut File,
    ) -> Result<()> {
        let target = attempt.target();
        attempt.advance(TransferStatus::InProgress)?;
        self.publish_status(guard, TransferStatus::InProgress);

        let cipher = attempt.cipher()?;
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let read = read_chunk(file, &mut buffer).await?;
            if read == 0 {
                break;
            }

            let chunk = cipher.encrypt(&buffer[..read])?;

            // Re-resolve every chunk so a disconnect stops the stream
            let handle = self
                .registry
                .lookup(&target)
                .await
                .ok_or_else(|| HiddenDropError::target_unreachable(target.to_string()))?;
            handle
                .send(ServerEvent::FileChunk(IncomingFileChunk {
                    from_client_id: PeerAddress::Relay,
                    chunk: chunk.to_bytes(),
                }))
                .await
                .map_err(|e| HiddenDropError::target_unreachable(format!("{}: {}", target, e)))?;

            attempt.record_chunk(read);
            events::publish(
                &self.events,
                RelayEvent::TransferProgress {
                    target,
                    bytes_sent: attempt.bytes_sent(),
                    total_bytes: attempt.metadata().size,
                    percent: attempt.percent(),
                },
            );
        }

        Ok(())
    }

    fn publish_status(&self, guard: &AttemptGuard, status: TransferStatus) {
        guard.set_status(status);
        events::publish(
            &self.events,
            RelayEvent::TransferStatus {
                target: guard.target,
                status,
            },
        );
    }
}

/// Fill `buffer` from `file`, stopping early only at end of file
async fn read_chunk(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
