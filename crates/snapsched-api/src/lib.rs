//! Schedule grammar and protocol types for snapschedd
//!
//! This crate defines the stable API between snapschedd and clients:
//! - Interval and retention grammars
//! - Schedule views returned by queries
//! - Commands (requests from clients) and responses
//! - Versioning

mod commands;
mod schedule;
mod types;

pub use commands::*;
pub use schedule::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
