//! The chat session: one explicitly owned context object per authenticated
//! user.
//!
//! Owns the single transport connection and connection status, the state
//! store, and the outbound dispatch wiring. Created on login, torn down on
//! logout. Only the reconnection controller inside this module ever invokes
//! the transport's connect; every other component reads status and publishes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use talkline_shared::{protocol, ChatError, ClientFrame, Message, Room, ServerFrame};

use crate::api_client::ApiClient;
use crate::dispatcher::{InboundSink, OutboundDispatcher, Publisher, SendRoute};
use crate::store::ChatStore;
use crate::ws::{
    ConnectionStatus, ReconnectAction, ReconnectConfig, ReconnectController, TransportEvent,
    WsConnection,
};

struct SessionInner {
    api: ApiClient,
    ws_url: String,
    user_id: String,
    store: Mutex<ChatStore>,
    /// Version counter bumped on every visible state change; the rendering
    /// layer subscribes and re-reads the store.
    changes: watch::Sender<u64>,
    controller: ReconnectController,
    conn: Mutex<Option<WsConnection>>,
    credential: Mutex<Option<String>>,
}

impl SessionInner {
    fn store(&self) -> MutexGuard<'_, ChatStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn conn(&self) -> MutexGuard<'_, Option<WsConnection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn credential(&self) -> MutexGuard<'_, Option<String>> {
        self.credential.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// Handle to the chat session core. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    pub fn new(api: ApiClient, ws_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_config(api, ws_url, user_id, ReconnectConfig::default())
    }

    pub fn with_config(
        api: ApiClient,
        ws_url: impl Into<String>,
        user_id: impl Into<String>,
        config: ReconnectConfig,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(SessionInner {
                api,
                ws_url: ws_url.into(),
                user_id: user_id.into(),
                store: Mutex::new(ChatStore::new()),
                changes,
                controller: ReconnectController::new(config),
                conn: Mutex::new(None),
                credential: Mutex::new(None),
            }),
        }
    }

    // --- Lifecycle ---

    /// Connect with a session credential (called on login).
    ///
    /// Fails with [`ChatError::AuthMissing`] when the credential is empty; no
    /// network action is taken and nothing is retried. A transport failure
    /// on the initial attempt is handled by the reconnection controller;
    /// progress is observable through [`ChatSession::subscribe_status`].
    pub async fn connect(&self, token: impl Into<String>) -> Result<(), ChatError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ChatError::AuthMissing);
        }
        *self.inner.credential() = Some(token);
        if let Some(ReconnectAction::Connect) = self.inner.controller.on_connect_requested() {
            attempt_connect(self.inner.clone()).await;
        }
        Ok(())
    }

    /// Tear the session down (called on logout). Closes the transport,
    /// cancels any pending reconnect and clears all chat state.
    pub fn disconnect(&self) {
        info!("session disconnect");
        *self.inner.credential() = None;
        // reset before closing so the resulting close event is ignored
        self.inner.controller.reset();
        if let Some(conn) = self.inner.conn().take() {
            conn.disconnect();
        }
        self.inner.store().reset();
        self.inner.notify();
    }

    /// Manual retry after the reconnect ceiling was exceeded.
    pub async fn retry(&self) {
        if let Some(ReconnectAction::Connect) = self.inner.controller.on_connect_requested() {
            attempt_connect(self.inner.clone()).await;
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.controller.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.controller.subscribe()
    }

    /// Change-notification channel for the rendering layer: the value is a
    /// version counter, re-read the store when it moves.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Read access to the state store.
    pub fn with_store<R>(&self, f: impl FnOnce(&ChatStore) -> R) -> R {
        f(&self.inner.store())
    }

    // --- Room intents ---

    /// Fetch and replace the room collection. On failure the collection is
    /// left unchanged.
    pub async fn load_rooms(&self) -> Result<(), ChatError> {
        let rooms = self.inner.api.get_rooms().await.map_err(ChatError::Fetch)?;
        self.inner.store().replace_rooms(rooms);
        self.inner.notify();
        Ok(())
    }

    /// Select a room and fetch its messages.
    ///
    /// The selection is optimistic: it sticks even when the fetch fails, in
    /// which case previously cached messages remain and the error is
    /// surfaced. A fetch resolving after the selection moved on is discarded
    /// by the store's stale-response guard.
    pub async fn select_room(&self, room_id: &str) -> Result<(), ChatError> {
        self.inner.store().set_current_room(room_id);
        self.inner.notify();

        let messages = self
            .inner
            .api
            .get_messages(room_id)
            .await
            .map_err(ChatError::Fetch)?;

        let (applied, had_unread) = {
            let mut store = self.inner.store();
            let had_unread = store.room(room_id).map(|r| r.unread_count > 0).unwrap_or(false);
            let applied = store.apply_fetched_messages(room_id, messages);
            (applied, had_unread)
        };
        if applied {
            self.inner.notify();
            if had_unread {
                // server-side read marker is best-effort
                if let Err(e) = self.inner.api.mark_read(room_id).await {
                    warn!(room_id, error = %e, "failed to mark room read");
                }
            }
        }
        Ok(())
    }

    /// Create a room and select it.
    pub async fn create_room(
        &self,
        name: &str,
        participants: Vec<String>,
    ) -> Result<Room, ChatError> {
        let room = self
            .inner
            .api
            .create_room(name, participants)
            .await
            .map_err(ChatError::Fetch)?;
        self.inner.store().add_room(room.clone());
        self.inner.notify();
        self.select_room(&room.id).await?;
        Ok(room)
    }

    /// Leave a room and drop it from the store.
    pub async fn leave_room(&self, room_id: &str) -> Result<(), ChatError> {
        self.inner
            .api
            .leave_room(room_id)
            .await
            .map_err(ChatError::Fetch)?;
        self.inner.store().remove_room(room_id);
        self.inner.notify();
        Ok(())
    }

    // --- Outbound ---

    /// Send a message to a room over whichever path is available.
    pub async fn send(&self, room_id: &str, content: &str) -> Result<SendRoute, ChatError> {
        let dispatcher = OutboundDispatcher::new(
            SessionPublisher {
                inner: self.inner.clone(),
            },
            self.inner.api.clone(),
        );
        let sink = StoreSink(&self.inner);
        dispatcher.send(room_id, content, &sink).await
    }

    /// Broadcast the user's typing state for the currently selected room.
    /// Best-effort: silently dropped when there is no selection or no
    /// realtime connection.
    pub fn send_typing(&self, is_typing: bool) {
        let Some(room_id) = self.inner.store().current_room_id().map(str::to_string) else {
            return;
        };
        let dispatcher = OutboundDispatcher::new(
            SessionPublisher {
                inner: self.inner.clone(),
            },
            self.inner.api.clone(),
        );
        dispatcher.send_typing_status(&room_id, is_typing);
    }

    #[cfg(test)]
    pub(crate) fn with_store_mut<R>(&self, f: impl FnOnce(&mut ChatStore) -> R) -> R {
        f(&mut self.inner.store())
    }
}

/// Drives one transport connect attempt and wires its event pump.
async fn attempt_connect(inner: Arc<SessionInner>) {
    let credential = inner.credential().clone();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    match WsConnection::connect(&inner.ws_url, credential.as_deref(), events_tx).await {
        Ok(conn) => {
            // a logout may have raced the attempt: the credential is gone
            // and the controller was reset, so drop the fresh socket
            if inner.credential().is_none() {
                conn.disconnect();
                return;
            }
            if let Err(e) = conn.subscribe(&protocol::user_queue(&inner.user_id)) {
                warn!(error = %e, "failed to subscribe user queue");
            }
            *inner.conn() = Some(conn);
            spawn_event_pump(inner, events_rx);
        }
        Err(ChatError::AuthMissing) => {
            // credential went away (logout raced the attempt); terminal
            // until the next login
            inner.controller.reset();
        }
        Err(e) => {
            warn!(error = %e, "websocket connect failed");
            if let Some(ReconnectAction::Backoff(delay)) = inner.controller.on_closed(false) {
                schedule_backoff(inner, delay);
            }
        }
    }
}

/// Sleep out the backoff, then re-drive connect. At most one of these can be
/// pending; the machine's pending flag refuses to schedule a second.
fn schedule_backoff(inner: Arc<SessionInner>, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(ReconnectAction::Connect) = inner.controller.on_backoff_elapsed() {
            attempt_connect(inner).await;
        }
    });
}

/// Pump transport events into the store and the reconnection controller.
fn spawn_event_pump(inner: Arc<SessionInner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened => {
                    inner.controller.on_opened();
                    inner.notify();
                }
                TransportEvent::Frame(envelope) => match envelope.payload {
                    ServerFrame::MessageNew { message } => {
                        if inner.store().record_inbound_message(message) {
                            inner.notify();
                        }
                    }
                    ServerFrame::Typing {
                        room_id,
                        username,
                        is_typing,
                    } => {
                        inner.store().record_typing_event(&room_id, &username, is_typing);
                        inner.notify();
                    }
                },
                TransportEvent::Error(detail) => {
                    warn!(detail = %detail, "transport error");
                    handle_close(&inner, false);
                }
                TransportEvent::Closed { code, reason } => {
                    info!(?code, reason = %reason, "transport closed");
                    // 1000 is the server signalling intentional termination
                    let normal = code == Some(1000);
                    handle_close(&inner, normal);
                }
            }
        }
    });
}

fn handle_close(inner: &Arc<SessionInner>, normal: bool) {
    inner.conn().take();
    inner.notify();
    if let Some(ReconnectAction::Backoff(delay)) = inner.controller.on_closed(normal) {
        schedule_backoff(inner.clone(), delay);
    }
}

/// Publisher over the session's single connection.
struct SessionPublisher {
    inner: Arc<SessionInner>,
}

impl Publisher for SessionPublisher {
    fn is_connected(&self) -> bool {
        self.inner.controller.status().is_connected()
    }

    fn publish_message(&self, room_id: &str, content: &str) -> Result<(), ChatError> {
        match self.inner.conn().as_ref() {
            Some(conn) => conn.publish(
                &protocol::room_send(room_id),
                ClientFrame::MessageCreate {
                    room_id: room_id.to_string(),
                    content: content.to_string(),
                },
            ),
            None => Err(ChatError::NotConnected),
        }
    }

    fn publish_typing(&self, room_id: &str, is_typing: bool) -> Result<(), ChatError> {
        match self.inner.conn().as_ref() {
            Some(conn) => conn.publish(
                &protocol::room_send(room_id),
                ClientFrame::Typing {
                    room_id: room_id.to_string(),
                    is_typing,
                },
            ),
            None => Err(ChatError::NotConnected),
        }
    }
}

/// Funnels fallback-delivered messages into the store's single inbound entry
/// point.
struct StoreSink<'a>(&'a Arc<SessionInner>);

impl InboundSink for StoreSink<'_> {
    fn record_inbound_message(&self, message: Message) {
        if self.0.store().record_inbound_message(message) {
            self.0.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use talkline_shared::RoomType;

    fn session() -> ChatSession {
        ChatSession::new(ApiClient::new(), "ws://localhost:9/api/chat-ws", "u1")
    }

    fn room(id: &str) -> Room {
        Room {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            room_type: RoomType::Group,
            last_message: None,
            unread_count: 0,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn starts_disconnected_and_empty() {
        let session = session();
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.with_store(|s| s.sorted_rooms().is_empty()));
    }

    #[tokio::test]
    async fn connect_without_token_is_auth_missing() {
        let session = session();
        let err = session.connect("").await.unwrap_err();
        assert_eq!(err, ChatError::AuthMissing);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_resets_store_and_status() {
        let session = session();
        session.with_store_mut(|s| {
            s.replace_rooms(vec![room("a")]);
            s.set_current_room("a");
            s.record_typing_event("a", "bob", true);
        });

        session.disconnect();
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        session.with_store(|s| {
            assert!(s.sorted_rooms().is_empty());
            assert!(s.current_room_id().is_none());
            assert!(s.typing_in("a").is_empty());
        });
    }

    #[tokio::test]
    async fn disconnect_bumps_change_version() {
        let session = session();
        let rx = session.subscribe_changes();
        let before = *rx.borrow();
        session.disconnect();
        assert_ne!(*rx.borrow(), before);
    }

    #[tokio::test]
    async fn send_typing_without_selection_is_a_noop() {
        let session = session();
        session.send_typing(true);
        session.send_typing(false);
    }
}
