/// hiddendrop daemon library
///
/// This crate provides the daemon that runs the relay behind a Tor hidden
/// service: the WebSocket signaling endpoint and the local operator API.

pub mod api;
pub mod socket;

pub use api::ApiServer;
pub use socket::RelayServer;
