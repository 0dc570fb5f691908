/// API Response types

use hiddendrop_core::TransferStatus;
use serde::{Deserialize, Serialize};

/// Relay status response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Daemon version
    pub version: String,
    /// Number of connected sessions
    pub sessions: usize,
    /// Hidden service address, once Tor has published it
    pub onion_address: Option<String>,
    /// Relay-initiated transfers still running
    pub active_transfers: Vec<TransferInfo>,
}

/// One relay-initiated transfer
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInfo {
    pub target_client_id: String,
    pub status: TransferStatus,
}

/// Connected clients response
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientsResponse {
    /// Client ids in registration order
    pub clients: Vec<String>,
    pub total: usize,
}

/// Request to send a local file to a connected client
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendFileRequest {
    pub target_client_id: String,
    /// Path on the relay host
    pub path: String,
}

/// Returned once a send has been queued
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendFileResponse {
    pub target_client_id: String,
    pub file_name: String,
    pub file_size: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}
