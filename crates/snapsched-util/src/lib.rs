//! Shared utilities for snapsched
//!
//! This crate provides:
//! - ID types (FsName, ClientId)
//! - The error taxonomy shared by every layer
//! - Schedule path normalization
//! - UTC time helpers and snapshot timestamp formatting
//! - Default paths for socket, config, and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
