pub mod crypto;
pub mod events;
pub mod protocol;
pub mod relay;
pub mod service;
pub mod session;
pub mod transfer;

pub use protocol::*;

// Re-export crypto types
pub use crypto::{ChunkCipher, CryptoError, EncryptedChunk, TransferKey};

// Re-export relay types
pub use events::RelayEvent;
pub use relay::RelayDispatcher;
pub use session::{SessionHandle, SessionRegistry};
pub use transfer::{TransferAttempt, TransferNegotiator, TransferReport, TransferStatus};

// Re-export hidden service types
pub use service::{
    AddressResolver, HiddenService, HiddenServiceError, HostnameWatcher, OnionAddress,
    OnionAddressError,
};
