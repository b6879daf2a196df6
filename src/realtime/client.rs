//! Real-time Channel Client
//!
//! A single supervisor task owns the connection lifecycle: it connects,
//! runs the session until the peer goes away or the heartbeat lapses, then
//! schedules the next attempt with capped exponential backoff. A manual
//! [`RealtimeClient::disconnect`] aborts the supervisor and suppresses any
//! reconnect.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::current_timestamp_ms;
use crate::realtime::connector::{Connection, Connector};
use crate::realtime::message::{AuthPayload, ChannelEvent, InboundMessage};
use crate::realtime::{RealtimeConfig, COMPILED_IN};
use crate::state::{AppState, AppStore, Severity, Subscription};

/// Subscriber callback. Errors and panics are logged and isolated.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync>;

// == Connection State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Snapshot of the channel for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub state: ConnectionState,
    pub enabled: bool,
    pub reconnect_attempts: u32,
    pub connections_opened: u64,
    pub last_error: Option<String>,
}

enum SessionEnd {
    PeerClosed,
    HeartbeatTimeout,
}

struct Link {
    state: ConnectionState,
    attempts: u32,
    manual_close: bool,
    outbound: Option<mpsc::UnboundedSender<String>>,
    supervisor: Option<JoinHandle<()>>,
    last_error: Option<String>,
}

struct Inner {
    url: String,
    config: RealtimeConfig,
    enabled: bool,
    connector: Arc<dyn Connector>,
    store: AppStore,
    link: Mutex<Link>,
    handlers: Mutex<HashMap<String, Vec<(u64, MessageHandler)>>>,
    next_handler_id: AtomicU64,
    connections_opened: AtomicU64,
    session_watch: Mutex<Option<Subscription>>,
}

// == Realtime Client ==
/// Clonable handle to the push channel.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RealtimeClient {
    /// Creates a closed client for `url`.
    ///
    /// The channel is enabled only if both `config.enabled` and the build
    /// allow it; this is decided once, here.
    pub fn new(
        url: impl Into<String>,
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        store: AppStore,
    ) -> Self {
        let enabled = config.enabled && COMPILED_IN;
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                config,
                enabled,
                connector,
                store,
                link: Mutex::new(Link {
                    state: ConnectionState::Closed,
                    attempts: 0,
                    manual_close: false,
                    outbound: None,
                    supervisor: None,
                    last_error: None,
                }),
                handlers: Mutex::new(HashMap::new()),
                next_handler_id: AtomicU64::new(0),
                connections_opened: AtomicU64::new(0),
                session_watch: Mutex::new(None),
            }),
        }
    }

    // == Connect ==
    /// Starts connecting. No-op when disabled, open, connecting, already
    /// waiting to reconnect, or called outside a tokio runtime.
    pub fn connect(&self) {
        if !self.inner.enabled {
            debug!("Real-time channel disabled; connect ignored");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available; connect ignored");
            return;
        };
        let mut link = self.inner.link.lock();
        let supervising = link
            .supervisor
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if supervising || matches!(link.state, ConnectionState::Open | ConnectionState::Connecting)
        {
            debug!(state = ?link.state, "Real-time channel already active");
            return;
        }
        link.manual_close = false;
        link.attempts = 0;
        link.state = ConnectionState::Connecting;
        link.supervisor = Some(runtime.spawn(supervise(Arc::clone(&self.inner))));
    }

    // == Disconnect ==
    /// Closes the channel and cancels any pending reconnect.
    pub fn disconnect(&self) {
        let was_open = {
            let mut link = self.inner.link.lock();
            link.manual_close = true;
            let was_open = link.state == ConnectionState::Open;
            link.state = ConnectionState::Closing;
            if let Some(supervisor) = link.supervisor.take() {
                supervisor.abort();
            }
            // Dropping the sender closes the transport
            link.outbound = None;
            link.attempts = 0;
            link.state = ConnectionState::Closed;
            was_open
        };
        if was_open {
            info!(url = %self.inner.url, "Real-time channel disconnected");
            self.inner.store.set_connected(false);
        }
    }

    // == Send ==
    /// Sends `event` stamped with the current time. Returns false unless open.
    pub fn send(&self, event: ChannelEvent) -> bool {
        self.inner.send_event(event, None)
    }

    /// Sends `event` addressed to a named channel.
    pub fn send_on(&self, channel: impl Into<String>, event: ChannelEvent) -> bool {
        self.inner.send_event(event, Some(channel.into()))
    }

    // == Subscribe ==
    /// Registers `handler` for messages of type `kind`.
    pub fn subscribe<F>(&self, kind: &str, handler: F) -> Subscription
    where
        F: Fn(&InboundMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .entry(kind.to_string())
            .or_default()
            .push((id, Arc::new(handler)));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let kind = kind.to_string();
        Subscription::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let mut handlers = inner.handlers.lock();
            if let Some(set) = handlers.get_mut(&kind) {
                set.retain(|(hid, _)| *hid != id);
                if set.is_empty() {
                    handlers.remove(&kind);
                }
            }
        })
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.inner.handlers.lock().get(kind).map_or(0, Vec::len)
    }

    /// Returns true if any handler set exists for `kind`.
    pub fn has_handlers(&self, kind: &str) -> bool {
        self.inner.handlers.lock().contains_key(kind)
    }

    // == Session Coupling ==
    /// Ties the channel to the session: a login connects after the configured
    /// delay, a logout disconnects. Connects right away (after the delay) if a
    /// session is already active.
    pub fn watch_session(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let subscription = self
            .inner
            .store
            .subscribe(move |new: &AppState, old: &AppState| {
                let (now, before) = (new.session.authenticated, old.session.authenticated);
                if now == before {
                    return;
                }
                let Some(inner) = weak.upgrade() else { return };
                let client = RealtimeClient { inner };
                if now {
                    client.connect_after_delay();
                } else {
                    client.disconnect();
                }
            });
        if let Some(previous) = self.inner.session_watch.lock().replace(subscription) {
            previous.unsubscribe();
        }
        if self.inner.store.get_state().session.authenticated {
            self.connect_after_delay();
        }
    }

    /// Stops following the session.
    pub fn unwatch_session(&self) {
        if let Some(subscription) = self.inner.session_watch.lock().take() {
            subscription.unsubscribe();
        }
    }

    fn connect_after_delay(&self) {
        let delay = self.inner.config.connect_delay;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    sleep(delay).await;
                    let Some(inner) = weak.upgrade() else { return };
                    // Session may have ended during the delay
                    if inner.store.get_state().session.authenticated {
                        RealtimeClient { inner }.connect();
                    }
                });
            }
            Err(_) => warn!("No async runtime available; real-time connect skipped"),
        }
    }

    // == Status ==
    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn status(&self) -> ChannelStatus {
        let link = self.inner.link.lock();
        ChannelStatus {
            state: link.state,
            enabled: self.inner.enabled,
            reconnect_attempts: link.attempts,
            connections_opened: self.inner.connections_opened.load(Ordering::Relaxed),
            last_error: link.last_error.clone(),
        }
    }
}

// == Supervisor ==
async fn supervise(inner: Arc<Inner>) {
    loop {
        inner.link.lock().state = ConnectionState::Connecting;
        match inner.connector.connect(&inner.url).await {
            Ok(connection) => {
                let end = inner.run_session(connection).await;
                inner.end_session(end);
            }
            Err(err) => {
                warn!(url = %inner.url, error = %err, "Real-time connect failed");
                let mut link = inner.link.lock();
                link.state = ConnectionState::Closed;
                link.last_error = Some(err.to_string());
            }
        }

        let delay = {
            let mut link = inner.link.lock();
            if link.manual_close {
                return;
            }
            if link.attempts >= inner.config.max_reconnect_attempts {
                warn!(
                    attempts = link.attempts,
                    "Giving up on real-time channel after repeated failures"
                );
                return;
            }
            link.attempts += 1;
            inner.config.backoff_delay(link.attempts)
        };
        info!(delay_ms = delay.as_millis() as u64, "Reconnecting real-time channel");
        sleep(delay).await;
    }
}

impl Inner {
    // == Session ==
    async fn run_session(&self, connection: Connection) -> SessionEnd {
        let Connection {
            outbound,
            mut inbound,
        } = connection;
        {
            let mut link = self.link.lock();
            link.state = ConnectionState::Open;
            link.attempts = 0;
            link.outbound = Some(outbound);
            link.last_error = None;
        }
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        info!(url = %self.url, "Real-time channel open");
        self.store.set_connected(true);
        self.send_auth();

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_pong = Instant::now();

        loop {
            tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(text) => {
                        if self.handle_text(&text) {
                            last_pong = Instant::now();
                        }
                    }
                    None => return SessionEnd::PeerClosed,
                },
                _ = heartbeat.tick() => {
                    if last_pong.elapsed() > period * 2 {
                        warn!("No heartbeat reply; closing real-time channel");
                        return SessionEnd::HeartbeatTimeout;
                    }
                    self.send_event(ChannelEvent::Ping, None);
                }
            }
        }
    }

    fn end_session(&self, end: SessionEnd) {
        {
            let mut link = self.link.lock();
            link.outbound = None;
            link.state = ConnectionState::Closed;
            if let SessionEnd::HeartbeatTimeout = end {
                link.last_error = Some("heartbeat timeout".to_string());
            }
        }
        info!(url = %self.url, "Real-time channel closed");
        self.store.set_connected(false);
    }

    fn send_auth(&self) {
        let session = self.store.get_state().session.clone();
        if session.authenticated {
            self.send_event(
                ChannelEvent::Auth(AuthPayload {
                    user_id: session.id,
                    token: None,
                }),
                None,
            );
        }
    }

    fn send_event(&self, event: ChannelEvent, channel: Option<String>) -> bool {
        let text = match event
            .encode(channel, current_timestamp_ms())
            .and_then(|wire| {
                serde_json::to_string(&wire)
                    .map_err(|e| crate::error::SyncError::Channel(e.to_string()))
            }) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "Failed to encode channel message");
                return false;
            }
        };
        let link = self.link.lock();
        match (&link.state, &link.outbound) {
            (ConnectionState::Open, Some(outbound)) => outbound.send(text).is_ok(),
            _ => {
                debug!(kind = event.kind(), "Channel not open; message dropped");
                false
            }
        }
    }

    // == Inbound ==
    /// Applies built-in effects and dispatches to subscribers.
    /// Returns true if the message was a heartbeat reply.
    fn handle_text(&self, text: &str) -> bool {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "Dropping invalid channel message");
                return false;
            }
        };

        match &message.event {
            ChannelEvent::Ping => {
                self.send_event(ChannelEvent::Pong, None);
            }
            ChannelEvent::NewMessage(_) => self.store.increment_unread(),
            ChannelEvent::NewAnnouncement(announcement) if announcement.important => {
                self.store.notify(
                    Severity::Info,
                    format!("New announcement: {}", announcement.title),
                );
            }
            ChannelEvent::UserOnline(presence) => self.store.user_online(presence.user_id.clone()),
            ChannelEvent::UserOffline(presence) => self.store.user_offline(&presence.user_id),
            ChannelEvent::Notification(notice) => {
                self.store.notify(notice.severity, notice.message.clone());
            }
            _ => {}
        }

        self.dispatch(&message);
        matches!(message.event, ChannelEvent::Pong)
    }

    fn dispatch(&self, message: &InboundMessage) {
        let kind = message.event.kind();
        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .get(kind)
            .map(|set| set.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(kind, error = %err, "Channel handler failed"),
                Err(_) => warn!(kind, "Channel handler panicked"),
            }
        }
    }
}
