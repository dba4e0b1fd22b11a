//! Filesystem and object-store client interfaces for snapschedd
//!
//! This crate defines the interface between the scheduler and the storage
//! it drives: a filesystem client that creates, lists and removes snapshot
//! directories, and an object store that holds the persisted schedule
//! database. It contains no backend code itself apart from in-memory mocks.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
