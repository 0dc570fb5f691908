use hiddendrop_common::config::protocol::RELAY_ADDRESS;
use hiddendrop_common::ClientId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Who a message is addressed to or comes from.
///
/// Peers are addressed by their hex client id; the relay itself answers to
/// `"server"`. Anything else can never resolve to a live session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddress {
    Relay,
    Client(ClientId),
    Unknown(String),
}

impl PeerAddress {
    pub fn client(&self) -> Option<ClientId> {
        match self {
            Self::Client(id) => Some(*id),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == RELAY_ADDRESS {
            return Self::Relay;
        }
        match ClientId::from_hex(value) {
            Ok(id) => Self::Client(id),
            Err(_) => Self::Unknown(value.to_string()),
        }
    }
}

impl From<ClientId> for PeerAddress {
    fn from(id: ClientId) -> Self {
        Self::Client(id)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relay => f.write_str(RELAY_ADDRESS),
            Self::Client(id) => write!(f, "{}", id),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for PeerAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Chunk payloads travel as base64 inside JSON frames
mod base64_bytes {
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// File description a sender attaches to a transfer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub name: String,
    pub size: u64,
}

/// Events a peer sends to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Discover,
    TransferRequest(TransferRequestMessage),
    TransferResponse(TransferResponseMessage),
    FileChunk(FileChunkMessage),
}

impl ClientEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::TransferRequest(_) => "transfer-request",
            Self::TransferResponse(_) => "transfer-response",
            Self::FileChunk(_) => "file-chunk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequestMessage {
    pub target_client_id: PeerAddress,
    pub metadata: TransferMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponseMessage {
    pub target_client_id: PeerAddress,
    pub accept: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkMessage {
    pub target_client_id: PeerAddress,
    #[serde(with = "base64_bytes")]
    pub chunk: Vec<u8>,
}

/// Events the relay sends to a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ClientId(ClientId),
    Clients(Vec<ClientId>),
    TransferRequest(IncomingTransferRequest),
    TransferResponse(IncomingTransferResponse),
    FileChunk(IncomingFileChunk),
    Error(ErrorMessage),
    ClientDisconnected(ClientId),
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ClientId(_) => "client-id",
            Self::Clients(_) => "clients",
            Self::TransferRequest(_) => "transfer-request",
            Self::TransferResponse(_) => "transfer-response",
            Self::FileChunk(_) => "file-chunk",
            Self::Error(_) => "error",
            Self::ClientDisconnected(_) => "client-disconnected",
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorMessage {
            message: message.into(),
            code,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingTransferRequest {
    pub from_client_id: PeerAddress,
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingTransferResponse {
    pub from_client_id: PeerAddress,
    pub accept: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingFileChunk {
    pub from_client_id: PeerAddress,
    #[serde(with = "base64_bytes")]
    pub chunk: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    pub code: ErrorCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TargetUnavailable,
    InvalidMessage,
}
