pub mod dispatcher;

pub use dispatcher::RelayDispatcher;
