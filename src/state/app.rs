//! Application State
//!
//! The portal's shared state: session, UI chrome, real-time status and
//! cached data slices, plus the actions components use to change it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::current_timestamp_ms;
use crate::state::StateContainer;

/// Most recent notifications kept; older ones are dropped.
pub const MAX_NOTIFICATIONS: usize = 20;

/// Handle to the application-wide state.
pub type AppStore = StateContainer<AppState>;

// == Session ==
/// Identity of the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub display_name: String,
    pub role: String,
    pub authenticated: bool,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

// == Notifications ==
/// Severity of a transient notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient, user-visible notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub created_at: u64,
}

// == UI ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub theme: String,
    pub sidebar_collapsed: bool,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    pub busy: bool,
    pub active_section: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            sidebar_collapsed: false,
            notifications: Vec::new(),
            busy: false,
            active_section: "dashboard".to_string(),
        }
    }
}

// == Real-time ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeState {
    pub connected: bool,
    pub unread_count: u32,
    #[serde(default)]
    pub online_users: BTreeSet<String>,
    pub last_activity_at: u64,
}

// == Data Slices ==
/// Locally held copy of a resource collection.
///
/// `last_fetched_at == 0` marks the slice stale whatever its items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSlice {
    #[serde(default)]
    pub items: Vec<Value>,
    pub last_fetched_at: u64,
}

impl DataSlice {
    /// Returns true if the slice must be refetched.
    pub fn is_stale(&self) -> bool {
        self.last_fetched_at == 0
    }
}

// == App State ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub ui: UiState,
    #[serde(default)]
    pub realtime: RealtimeState,
    #[serde(default)]
    pub data_slices: BTreeMap<String, DataSlice>,
}

impl AppState {
    /// Returns true if the slice is missing or stale.
    pub fn is_slice_stale(&self, name: &str) -> bool {
        self.data_slices.get(name).map_or(true, DataSlice::is_stale)
    }

}

/// Id field of a record, as a string.
pub(crate) fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

// == Actions ==
impl StateContainer<AppState> {
    // -- session --
    /// Stores an authenticated session.
    pub fn login(&self, session: Session) {
        self.set_state(move |s| {
            s.session = Session {
                authenticated: true,
                ..session
            };
        });
    }

    /// Clears the session and per-user real-time data.
    pub fn logout(&self) {
        self.set_state(|s| {
            s.session = Session::default();
            s.realtime.unread_count = 0;
            s.realtime.online_users.clear();
        });
    }

    // -- ui --
    /// Raises a transient notification and returns its id.
    pub fn notify(&self, severity: Severity, message: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let notification = Notification {
            id: id.clone(),
            severity,
            message: message.into(),
            created_at: current_timestamp_ms(),
        };
        self.set_state(move |s| {
            s.ui.notifications.push(notification);
            let overflow = s.ui.notifications.len().saturating_sub(MAX_NOTIFICATIONS);
            s.ui.notifications.drain(..overflow);
        });
        id
    }

    // -- realtime --
    pub fn set_connected(&self, connected: bool) {
        self.set_state(move |s| {
            s.realtime.connected = connected;
            s.realtime.last_activity_at = current_timestamp_ms();
        });
    }

    pub fn increment_unread(&self) {
        self.set_state(|s| {
            s.realtime.unread_count = s.realtime.unread_count.saturating_add(1);
            s.realtime.last_activity_at = current_timestamp_ms();
        });
    }

    pub fn user_online(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        self.set_state(move |s| {
            s.realtime.online_users.insert(user_id);
        });
    }

    pub fn user_offline(&self, user_id: &str) {
        let user_id = user_id.to_string();
        self.set_state(move |s| {
            s.realtime.online_users.remove(&user_id);
        });
    }

    // -- data slices --
    /// Replaces a slice with freshly fetched items.
    pub fn set_slice(&self, name: impl Into<String>, items: Vec<Value>) {
        let name = name.into();
        self.set_state(move |s| {
            s.data_slices.insert(
                name,
                DataSlice {
                    items,
                    last_fetched_at: current_timestamp_ms(),
                },
            );
        });
    }

    /// Marks a slice stale so the next read refetches it.
    pub fn mark_slice_stale(&self, name: &str) {
        let name = name.to_string();
        self.set_state(move |s| {
            if let Some(slice) = s.data_slices.get_mut(&name) {
                slice.last_fetched_at = 0;
            }
        });
    }

    /// Inserts `item`, or replaces the item with the same id.
    pub fn upsert_item(&self, name: impl Into<String>, item: Value) {
        let name = name.into();
        self.set_state(move |s| {
            let slice = s.data_slices.entry(name).or_default();
            let id = record_id(&item);
            match slice
                .items
                .iter_mut()
                .find(|existing| id.is_some() && record_id(existing) == id)
            {
                Some(existing) => *existing = item,
                None => slice.items.push(item),
            }
        });
    }

    /// Removes the item with `id` from a slice.
    pub fn remove_item(&self, name: &str, id: &str) {
        let name = name.to_string();
        let id = id.to_string();
        self.set_state(move |s| {
            if let Some(slice) = s.data_slices.get_mut(&name) {
                slice
                    .items
                    .retain(|item| record_id(item).as_deref() != Some(id.as_str()));
            }
        });
    }

    pub fn is_slice_stale(&self, name: &str) -> bool {
        self.get_state().is_slice_stale(name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> AppStore {
        StateContainer::new(AppState::default())
    }

    #[test]
    fn test_login_marks_authenticated() {
        let store = store();
        store.login(Session {
            id: "u1".to_string(),
            display_name: "Kim".to_string(),
            role: "staff".to_string(),
            authenticated: false,
            permissions: ["forum.post".to_string()].into_iter().collect(),
        });

        let state = store.get_state();
        assert!(state.session.authenticated);
        assert!(state.session.permissions.contains("forum.post"));

        store.logout();
        assert!(!store.get_state().session.authenticated);
    }

    #[test]
    fn test_notifications_are_capped() {
        let store = store();
        let first = store.notify(Severity::Info, "first");
        for i in 0..MAX_NOTIFICATIONS {
            store.notify(Severity::Info, format!("n{i}"));
        }

        let state = store.get_state();
        assert_eq!(state.ui.notifications.len(), MAX_NOTIFICATIONS);
        assert!(state.ui.notifications.iter().all(|n| n.id != first));
    }

    #[test]
    fn test_presence_and_unread() {
        let store = store();
        store.user_online("a");
        store.user_online("b");
        store.user_offline("a");
        store.increment_unread();
        store.increment_unread();

        let state = store.get_state();
        assert_eq!(
            state.realtime.online_users.iter().collect::<Vec<_>>(),
            vec!["b"]
        );
        assert_eq!(state.realtime.unread_count, 2);

    }

    #[test]
    fn test_slice_staleness() {
        let store = store();
        assert!(store.is_slice_stale("documents"));

        store.set_slice("documents", vec![json!({ "id": 1 })]);
        assert!(!store.is_slice_stale("documents"));

        store.mark_slice_stale("documents");
        assert!(store.is_slice_stale("documents"));
        // Items survive; only freshness changes
        assert_eq!(store.get_state().data_slices["documents"].items.len(), 1);
    }

    #[test]
    fn test_upsert_and_remove_item() {
        let store = store();
        store.upsert_item("posts", json!({ "id": 1, "title": "a" }));
        store.upsert_item("posts", json!({ "id": 2, "title": "b" }));
        store.upsert_item("posts", json!({ "id": 1, "title": "a2" }));

        let items = store.get_state().data_slices["posts"].items.clone();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["title"], "a2");

        store.remove_item("posts", "2");
        assert_eq!(store.get_state().data_slices["posts"].items.len(), 1);
    }

    #[test]
    fn test_state_json_shape() {
        let json = serde_json::to_value(AppState::default()).unwrap();
        assert_eq!(json["ui"]["theme"], "light");
        assert_eq!(json["realtime"]["unreadCount"], 0);
        assert!(json["dataSlices"].is_object());
    }
}
