//! Local backends for snapschedd
//!
//! Provides:
//! - A filesystem client rooted at a host directory, where snapshots are
//!   plain directories under the snapshot directory of each path
//! - An object store keeping one file per key in a metadata directory,
//!   replaced atomically on every write
//! - A connector mapping configured filesystem names to both

mod connector;
mod local_fs;
mod object_store;

pub use connector::*;
pub use local_fs::*;
pub use object_store::*;
