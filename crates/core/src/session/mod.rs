pub mod registry;

pub use registry::{DeliveryError, SessionHandle, SessionRegistry};
