//! Snapshot scheduling engine for snapschedd
//!
//! This crate is the heart of snapschedd, containing:
//! - The scheduler facade: add, remove, list and (de)activate schedules
//! - One timer deadline per filesystem, re-armed after every change
//! - Snapshot creation and retention pruning when a deadline expires
//! - Multi-granularity retention evaluation

mod engine;
mod events;
mod retention;
mod timer;

pub use engine::*;
pub use events::*;
pub use retention::*;
pub use timer::*;
