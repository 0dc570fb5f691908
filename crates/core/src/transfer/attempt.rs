use crate::crypto::{ChunkCipher, TransferKey};
use crate::protocol::TransferMetadata;
use hiddendrop_common::{ClientId, HiddenDropError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one relay-initiated transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Metadata sent, waiting for the target to answer
    Requested,
    Accepted,
    Rejected,
    /// Chunks are being streamed
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    pub fn can_advance_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Requested, Accepted)
                | (Requested, Rejected)
                | (Requested, Failed)
                | (Accepted, InProgress)
                | (Accepted, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State owned by the initiator for the duration of one attempt.
///
/// The key is dropped (and wiped) as soon as a terminal status is reached.
#[derive(Debug)]
pub struct TransferAttempt {
    target: ClientId,
    metadata: TransferMetadata,
    key: Option<TransferKey>,
    status: TransferStatus,
    bytes_sent: u64,
    chunks_sent: u64,
}

impl TransferAttempt {
    /// Start a new attempt with a freshly generated key
    pub fn new(target: ClientId, metadata: TransferMetadata) -> Self {
        Self::with_key(target, metadata, TransferKey::generate())
    }

    pub fn with_key(target: ClientId, metadata: TransferMetadata, key: TransferKey) -> Self {
        Self {
            target,
            metadata,
            key: Some(key),
            status: TransferStatus::Requested,
            bytes_sent: 0,
            chunks_sent: 0,
        }
    }

    pub fn target(&self) -> ClientId {
        self.target
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow
    pub fn advance(&mut self, next: TransferStatus) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(HiddenDropError::internal(format!(
                "invalid transfer transition {} -> {}",
                self.status, next
            )));
        }

        self.status = next;
        if next.is_terminal() {
            self.key = None;
        }
        Ok(())
    }

    /// Cipher bound to this attempt's key
    pub fn cipher(&self) -> Result<ChunkCipher> {
        self.key
            .as_ref()
            .map(ChunkCipher::new)
            .ok_or_else(|| HiddenDropError::internal("transfer key already destroyed"))
    }

    pub fn record_chunk(&mut self, plaintext_len: usize) {
        self.bytes_sent += plaintext_len as u64;
        self.chunks_sent += 1;
    }

    /// Share of the announced size handed to the transport so far
    pub fn percent(&self) -> f64 {
        if self.metadata.size == 0 {
            return 100.0;
        }
        (self.bytes_sent as f64 / self.metadata.size as f64) * 100.0
    }
}
