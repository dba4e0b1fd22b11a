//! snapschedd service wiring
//!
//! Ties the configuration, the local backends, the snapshot scheduler and
//! the IPC server together. The `snapschedd` binary runs a [`Service`]
//! until a signal arrives; integration tests run one until told to stop.

mod handler;
mod service;

pub use handler::*;
pub use service::*;
