//! Persistence Module
//!
//! Durable key/value media and the adapter that mirrors cache entries into them.

mod adapter;
mod backend;

pub use adapter::PersistenceAdapter;
pub use backend::{FileBackend, MemoryBackend, PersistenceBackend, PersistenceError, SharedBackend};
