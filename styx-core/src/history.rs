// ABOUTME: In-memory per-room message history with bounded retention.
// ABOUTME: Total order is (timestamp, insertion sequence); an id index gives O(1) point lookups.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::message::ChatMessage;

/// Default retention cap per room; the oldest overflow is evicted first.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Ordering key: timestamp in microseconds plus a process-wide monotonic
/// sequence number. Identical timestamps fall back to insertion order, so
/// the order is always total and deterministic.
type OrderKey = (i64, u64);

#[derive(Default)]
struct RoomHistory {
    by_order: BTreeMap<OrderKey, ChatMessage>,
}

#[derive(Default)]
struct StoreState {
    rooms: HashMap<String, RoomHistory>,
    /// message_id -> (room_id, ordering key)
    index: HashMap<String, (String, OrderKey)>,
}

/// Ordered, capped message history.
///
/// The API is async so callers treat it like any other persistence
/// collaborator: fetch outside registry locks, then broadcast.
pub struct MessageStore {
    cap: usize,
    seq: AtomicU64,
    state: RwLock<StoreState>,
}

impl MessageStore {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            seq: AtomicU64::new(0),
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Append a message and trim the room to the newest `cap` entries.
    pub async fn store(&self, message: ChatMessage) {
        let key: OrderKey = (
            message.timestamp.timestamp_micros(),
            self.seq.fetch_add(1, Ordering::Relaxed),
        );
        let mut state = self.state.write().await;
        state
            .index
            .insert(message.message_id.clone(), (message.room_id.clone(), key));

        let room = state.rooms.entry(message.room_id.clone()).or_default();
        room.by_order.insert(key, message);

        // Evict oldest overflow and keep the id index in sync.
        let mut evicted = Vec::new();
        while room.by_order.len() > self.cap {
            if let Some((_, old)) = room.by_order.pop_first() {
                evicted.push(old.message_id);
            }
        }
        for id in evicted {
            state.index.remove(&id);
        }
        metrics::counter!("styx_messages_stored_total").increment(1);
    }

    /// Up to `limit` newest messages, returned oldest-first.
    pub async fn get_recent(&self, room_id: &str, limit: usize) -> Vec<ChatMessage> {
        let state = self.state.read().await;
        let Some(room) = state.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut window: Vec<ChatMessage> = room
            .by_order
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect();
        window.reverse();
        window
    }

    pub async fn get_by_id(&self, message_id: &str) -> Option<ChatMessage> {
        let state = self.state.read().await;
        let (room_id, key) = state.index.get(message_id)?;
        state
            .rooms
            .get(room_id)
            .and_then(|room| room.by_order.get(key))
            .cloned()
    }

    /// Remove one message. Returns false when the id is unknown or belongs
    /// to a different room; callers treat that as not-found, never fatal.
    pub async fn delete(&self, message_id: &str, room_id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some((indexed_room, key)) = state.index.get(message_id).cloned() else {
            tracing::debug!(message_id = %message_id, "Delete of unknown message id");
            return false;
        };
        if indexed_room != room_id {
            tracing::debug!(
                message_id = %message_id,
                room_id = %room_id,
                "Delete targeted the wrong room"
            );
            return false;
        }
        state.index.remove(message_id);
        if let Some(room) = state.rooms.get_mut(&indexed_room) {
            room.by_order.remove(&key);
        }
        true
    }

    /// Drop a room's entire history (room teardown). Returns the number of
    /// messages removed.
    pub async fn clear_room(&self, room_id: &str) -> usize {
        let mut state = self.state.write().await;
        let Some(room) = state.rooms.remove(room_id) else {
            return 0;
        };
        let count = room.by_order.len();
        for message in room.by_order.values() {
            state.index.remove(&message.message_id);
        }
        count
    }

    /// Timestamp of the newest stored message, if any. Used to decorate
    /// room listings.
    pub async fn last_activity(&self, room_id: &str) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        state
            .rooms
            .get(room_id)
            .and_then(|room| room.by_order.values().next_back())
            .map(|message| message.timestamp)
    }

    pub async fn message_count(&self, room_id: &str) -> usize {
        let state = self.state.read().await;
        state
            .rooms
            .get(room_id)
            .map(|room| room.by_order.len())
            .unwrap_or(0)
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(room: &str, content: &str) -> ChatMessage {
        ChatMessage::user(room, "u1", "alice", content)
    }

    #[tokio::test]
    async fn test_get_recent_returns_ascending_window() {
        let store = MessageStore::new(10);
        for i in 0..5 {
            store.store(msg("general", &format!("m{}", i))).await;
        }
        let recent = store.get_recent("general", 3).await;
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest_first() {
        let store = MessageStore::new(3);
        let first = msg("general", "m0");
        let first_id = first.message_id.clone();
        store.store(first).await;
        for i in 1..5 {
            store.store(msg("general", &format!("m{}", i))).await;
        }
        assert_eq!(store.message_count("general").await, 3);
        let recent = store.get_recent("general", 10).await;
        assert_eq!(recent[0].content, "m2");
        // Evicted messages are unreachable by id too.
        assert!(store.get_by_id(&first_id).await.is_none());
    }

    #[tokio::test]
    async fn test_identical_timestamps_keep_insertion_order() {
        let store = MessageStore::new(10);
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        for i in 0..4 {
            let mut m = msg("general", &format!("tie{}", i));
            m.timestamp = ts;
            store.store(m).await;
        }
        let recent = store.get_recent("general", 10).await;
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["tie0", "tie1", "tie2", "tie3"]);
    }

    #[tokio::test]
    async fn test_get_by_id_and_delete() {
        let store = MessageStore::new(10);
        let m = msg("general", "hello");
        let id = m.message_id.clone();
        store.store(m).await;

        assert_eq!(store.get_by_id(&id).await.unwrap().content, "hello");
        assert!(store.delete(&id, "general").await);
        assert!(store.get_by_id(&id).await.is_none());
        // Second delete reports not-found without failing.
        assert!(!store.delete(&id, "general").await);
    }

    #[tokio::test]
    async fn test_delete_wrong_room_is_refused() {
        let store = MessageStore::new(10);
        let m = msg("general", "hello");
        let id = m.message_id.clone();
        store.store(m).await;
        assert!(!store.delete(&id, "other").await);
        assert!(store.get_by_id(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_room_removes_everything() {
        let store = MessageStore::new(10);
        let m = msg("general", "hello");
        let id = m.message_id.clone();
        store.store(m).await;
        store.store(msg("general", "again")).await;
        store.store(msg("other", "kept")).await;

        assert_eq!(store.clear_room("general").await, 2);
        assert!(store.get_recent("general", 10).await.is_empty());
        assert!(store.get_by_id(&id).await.is_none());
        assert_eq!(store.message_count("other").await, 1);
    }

    #[tokio::test]
    async fn test_last_activity_tracks_newest_message() {
        let store = MessageStore::new(10);
        assert!(store.last_activity("general").await.is_none());
        let m = msg("general", "hello");
        let ts = m.timestamp;
        store.store(m).await;
        assert_eq!(store.last_activity("general").await, Some(ts));
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let store = MessageStore::new(10);
        store.store(msg("a", "in-a")).await;
        store.store(msg("b", "in-b")).await;
        assert_eq!(store.get_recent("a", 10).await.len(), 1);
        assert_eq!(store.get_recent("a", 10).await[0].content, "in-a");
    }
}
