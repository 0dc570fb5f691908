pub mod codec;
pub mod messages;

pub use codec::MessageCodec;
pub use messages::{
    ClientEvent, ErrorCode, ErrorMessage, FileChunkMessage, IncomingFileChunk,
    IncomingTransferRequest, IncomingTransferResponse, PeerAddress, ServerEvent,
    TransferMetadata, TransferRequestMessage, TransferResponseMessage,
};
