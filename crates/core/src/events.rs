/// Observer events published by the relay
///
/// Nothing in the protocol depends on these; the daemon logs them and tests
/// use them to watch relay-initiated transfers.
use crate::transfer::TransferStatus;
use hiddendrop_common::ClientId;
use tokio::sync::broadcast;

/// Capacity of the observer channel; slow observers see `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    ClientReady(ClientId),
    ClientList(Vec<ClientId>),
    TransferRequest {
        from: ClientId,
        file_name: String,
        file_size: u64,
    },
    TransferAccepted(ClientId),
    TransferRejected(ClientId),
    TransferStatus {
        target: ClientId,
        status: TransferStatus,
    },
    TransferProgress {
        target: ClientId,
        bytes_sent: u64,
        total_bytes: u64,
        percent: f64,
    },
    ClientDisconnected(ClientId),
}

pub fn channel() -> broadcast::Sender<RelayEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Publish without caring whether anyone listens
pub(crate) fn publish(events: &broadcast::Sender<RelayEvent>, event: RelayEvent) {
    let _ = events.send(event);
}
