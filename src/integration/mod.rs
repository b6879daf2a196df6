//! Integration Module
//!
//! Explicit construction and wiring of the whole sync layer.

mod caching_transport;
mod coordinator;

pub use caching_transport::CachingTransport;
pub use coordinator::{Components, Integration, MESSAGES_TAG};
