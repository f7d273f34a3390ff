//! Authoritative in-memory chat state.
//!
//! `ChatStore` is the single writer for rooms, messages, typing indicators
//! and the selected room. Both delivery paths (realtime and HTTP fallback)
//! funnel inbound messages through [`ChatStore::record_inbound_message`];
//! the message log is a private field so there is no other way to append.
//!
//! Every mutating operation either fully applies or fully no-ops, so a
//! failed fetch can never leave partially replaced state behind.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, trace};

use talkline_shared::{Message, Room};

#[derive(Debug, Default)]
pub struct ChatStore {
    rooms: Vec<Room>,
    current_room_id: Option<String>,
    /// Message log per room. Only `record_inbound_message` appends and only
    /// `apply_fetched_messages` replaces; nothing else touches this map.
    messages: HashMap<String, Vec<Message>>,
    typing: HashMap<String, BTreeSet<String>>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Rooms ---

    /// Replace the full room collection (from `GET /api/chat/rooms`).
    pub fn replace_rooms(&mut self, rooms: Vec<Room>) {
        debug!(count = rooms.len(), "replacing room collection");
        self.rooms = rooms;
    }

    /// Add a newly created room to the collection.
    pub fn add_room(&mut self, room: Room) {
        if self.rooms.iter().any(|r| r.id == room.id) {
            return;
        }
        self.rooms.push(room);
    }

    /// Remove a room after leaving it. Clears the selection and cached
    /// messages if the removed room was current.
    pub fn remove_room(&mut self, room_id: &str) {
        self.rooms.retain(|r| r.id != room_id);
        self.messages.remove(room_id);
        self.typing.remove(room_id);
        if self.current_room_id.as_deref() == Some(room_id) {
            self.current_room_id = None;
        }
    }

    /// Rooms sorted for the sidebar: rooms with a last message first, in
    /// descending last-message timestamp order, then rooms without one in
    /// descending creation timestamp order (the documented tie-break).
    pub fn sorted_rooms(&self) -> Vec<&Room> {
        let mut sorted: Vec<&Room> = self.rooms.iter().collect();
        sorted.sort_by(|a, b| match (&a.last_message, &b.last_message) {
            (Some(am), Some(bm)) => bm.created_at.cmp(&am.created_at),
            (None, None) => b.created_at.cmp(&a.created_at),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
        });
        sorted
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    // --- Selection ---

    /// Mark a room as current. Optimistic: the selection sticks even if the
    /// subsequent message fetch fails.
    pub fn set_current_room(&mut self, room_id: &str) {
        self.current_room_id = Some(room_id.to_string());
    }

    pub fn current_room_id(&self) -> Option<&str> {
        self.current_room_id.as_deref()
    }

    pub fn current_room(&self) -> Option<&Room> {
        let id = self.current_room_id.as_deref()?;
        self.room(id)
    }

    /// Apply a resolved message fetch for `room_id`.
    ///
    /// Stale-response guard: the result is applied only if `room_id` is still
    /// the current room at resolution time; otherwise it is discarded and
    /// `false` is returned. On apply, the room's cached messages are replaced
    /// (other rooms' caches are preserved) and its unread count is zeroed.
    pub fn apply_fetched_messages(&mut self, room_id: &str, messages: Vec<Message>) -> bool {
        if self.current_room_id.as_deref() != Some(room_id) {
            trace!(room_id, "discarding stale message fetch");
            return false;
        }
        self.messages.insert(room_id.to_string(), messages);
        if let Some(room) = self.rooms.iter_mut().find(|r| r.id == room_id) {
            room.unread_count = 0;
        }
        true
    }

    pub fn messages_for(&self, room_id: &str) -> &[Message] {
        self.messages.get(room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    // --- Inbound messages ---

    /// The single integration point for inbound messages from both the
    /// realtime and fallback paths.
    ///
    /// Appends to the owning room's log, updates the room's last-message
    /// pointer and increments its unread count unless the room is currently
    /// selected. Returns `false` when the message was a duplicate and
    /// nothing changed.
    ///
    /// Dedup is best-effort: by id, or by (timestamp, sender, content) since
    /// the two delivery paths assign ids from different spaces.
    pub fn record_inbound_message(&mut self, message: Message) -> bool {
        let log = self.messages.entry(message.room_id.clone()).or_default();
        if log.iter().any(|m| m.same_logical_send(&message)) {
            debug!(id = %message.id, room_id = %message.room_id, "dropping duplicate inbound message");
            return false;
        }
        log.push(message.clone());

        let is_current = self.current_room_id.as_deref() == Some(message.room_id.as_str());
        if let Some(room) = self.rooms.iter_mut().find(|r| r.id == message.room_id) {
            if !is_current {
                room.unread_count += 1;
            }
            room.last_message = Some(message);
        }
        true
    }

    // --- Typing ---

    /// Idempotent add/remove on the typing registry. Removing an absent user
    /// is a no-op.
    pub fn record_typing_event(&mut self, room_id: &str, username: &str, is_typing: bool) {
        if is_typing {
            self.typing
                .entry(room_id.to_string())
                .or_default()
                .insert(username.to_string());
        } else if let Some(users) = self.typing.get_mut(room_id) {
            users.remove(username);
            if users.is_empty() {
                self.typing.remove(room_id);
            }
        }
    }

    /// Usernames currently typing in a room.
    pub fn typing_in(&self, room_id: &str) -> Vec<&str> {
        self.typing
            .get(room_id)
            .map(|users| users.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    // --- Lifecycle ---

    /// Clear everything (on logout).
    pub fn reset(&mut self) {
        self.rooms.clear();
        self.current_room_id = None;
        self.messages.clear();
        self.typing.clear();
    }
}
