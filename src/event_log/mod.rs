//! Event Log module
//!
//! Durable, append-only, per-aggregate event history. The only source of
//! truth in the system: cache and read model are rebuilt from it.

mod blob;
mod error;
mod log;

pub use blob::{Blob, BlobError, BlobStore, FsBlobStore, InMemoryBlobStore, Precondition};
pub use error::LogError;
pub use log::{BlobEventLog, EventLog};
