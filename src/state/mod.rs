//! State Module
//!
//! Observable state container, cross-context sync hub and the portal's
//! application state model.

mod app;
mod container;
mod sync;

pub use app::{
    AppState, AppStore, DataSlice, Notification, RealtimeState, Session, Severity, UiState,
    MAX_NOTIFICATIONS,
};
pub(crate) use app::record_id;
pub use container::{StateContainer, Subscription};
pub use sync::{SyncHub, SyncMessage};
