pub mod attempt;
pub mod negotiator;

pub use attempt::{TransferAttempt, TransferStatus};
pub use negotiator::{TransferNegotiator, TransferReport};
