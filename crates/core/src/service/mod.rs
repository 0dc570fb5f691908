/// Tor hidden service support
///
/// - v3 .onion address validation
/// - Hidden service directory and torrc provisioning
/// - Hostname discovery and publication

pub mod address;
pub mod hidden_service;

pub use address::{OnionAddress, OnionAddressError};
pub use hidden_service::{AddressResolver, HiddenService, HiddenServiceError, HostnameWatcher};
