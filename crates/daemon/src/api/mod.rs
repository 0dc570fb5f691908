/// Local operator API
///
/// Provides HTTP endpoints on loopback for:
/// - Relay status and the published onion address
/// - Connected clients
/// - Starting relay-initiated file sends

pub mod handlers;
pub mod responses;
pub mod server;

pub use server::ApiServer;
pub use responses::*;
