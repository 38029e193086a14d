// ABOUTME: Owns live connections and per-room membership; all presence flows through here.
// ABOUTME: Fan-out iterates membership snapshots so disconnects may interleave with broadcasts.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::events::ServerFrame;
use crate::message::{ActiveUser, ChatMessage};

/// Transport handle for one connection. Frames queued here are drained by
/// the connection's writer task; a closed receiver marks the transport dead.
pub type FrameSender = mpsc::Sender<ServerFrame>;

/// Identifies one admission of a user. A reconnect mints a new id, so a
/// stale socket loop cannot tear down its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Terminal; entering it twice is a no-op.
    Disconnected,
}

/// A live connection. Owned exclusively by the registry; destroyed exactly
/// once, on disconnect or fatal send failure.
struct Connection {
    id: ConnectionId,
    username: String,
    room_id: String,
    sender: FrameSender,
    state: ConnectionState,
}

/// Read-only view of a connection for callers outside the registry.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub user_id: String,
    pub username: String,
    pub room_id: String,
    pub state: ConnectionState,
}

type Members = Arc<Mutex<HashSet<String>>>;

/// Live connection and membership state.
///
/// Lock layout: `connections` serializes per-user entry mutation; the
/// `rooms` lock guards only the map shape, each room's membership set has
/// its own lock so rooms do not contend. Lock order is always outer map
/// then inner set, and no lock is held across a transport send.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
    rooms: RwLock<HashMap<String, Members>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Admit a connection: register it, join the room, announce the join,
    /// greet the joiner with the presence list and a history replay, then
    /// push the updated presence list to the whole room.
    ///
    /// A still-live connection for the same user is evicted first with the
    /// normal disconnect side effects.
    pub async fn connect(
        &self,
        sender: FrameSender,
        user_id: &str,
        username: &str,
        room_id: &str,
        history: Vec<ChatMessage>,
    ) -> ConnectionId {
        self.disconnect(user_id).await;

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut connections = self.connections.write().await;
            connections.insert(
                user_id.to_string(),
                Connection {
                    id,
                    username: username.to_string(),
                    room_id: room_id.to_string(),
                    sender,
                    state: ConnectionState::Connecting,
                },
            );
        }

        let members = self.members_handle(room_id).await;
        members.lock().await.insert(user_id.to_string());

        {
            let mut connections = self.connections.write().await;
            if let Some(connection) = connections.get_mut(user_id) {
                connection.state = ConnectionState::Connected;
            }
        }

        tracing::info!(
            user_id = %user_id,
            username = %username,
            room_id = %room_id,
            "User connected"
        );
        metrics::counter!("styx_connections_total").increment(1);

        self.broadcast_to_room(
            room_id,
            ServerFrame::UserJoined {
                user_id: user_id.to_string(),
                username: username.to_string(),
                timestamp: Utc::now(),
            },
            Some(user_id),
        )
        .await;

        let active_users = self.active_users(room_id).await;
        self.send_to_user(
            user_id,
            ServerFrame::ConnectionEstablished {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                active_users,
            },
        )
        .await;

        for message in history {
            self.send_to_user(user_id, ServerFrame::MessageHistory(message))
                .await;
        }

        let active_users = self.active_users(room_id).await;
        self.broadcast_to_room(room_id, ServerFrame::UserListUpdated { active_users }, None)
            .await;

        id
    }

    /// Remove a connection and announce the departure. Idempotent: a second
    /// call for an already-removed user is a no-op and emits nothing.
    pub async fn disconnect(&self, user_id: &str) {
        self.remove_connection(user_id, None).await;
    }

    /// Like `disconnect`, but only if the user's current connection is the
    /// one identified by `id`. Lets a superseded socket loop finish without
    /// tearing down the connection that replaced it.
    pub async fn disconnect_exact(&self, user_id: &str, id: ConnectionId) {
        self.remove_connection(user_id, Some(id)).await;
    }

    async fn remove_connection(&self, user_id: &str, expected: Option<ConnectionId>) {
        let removed = {
            let mut connections = self.connections.write().await;
            let is_current = connections
                .get(user_id)
                .map(|connection| expected.is_none() || expected == Some(connection.id))
                .unwrap_or(false);
            if is_current {
                connections.remove(user_id)
            } else {
                None
            }
        };
        let Some(mut connection) = removed else {
            return;
        };
        connection.state = ConnectionState::Disconnected;

        let room_id = connection.room_id.clone();
        let emptied = {
            let rooms = self.rooms.read().await;
            match rooms.get(&room_id) {
                Some(members) => {
                    let mut set = members.lock().await;
                    set.remove(user_id);
                    set.is_empty()
                }
                None => false,
            }
        };
        if emptied {
            // Re-check under the map write lock; a concurrent connect may
            // have repopulated the set in the meantime.
            let mut rooms = self.rooms.write().await;
            if let Some(members) = rooms.get(&room_id) {
                if members.lock().await.is_empty() {
                    rooms.remove(&room_id);
                }
            }
        }

        tracing::info!(
            user_id = %user_id,
            username = %connection.username,
            room_id = %room_id,
            "User disconnected"
        );
        metrics::counter!("styx_disconnections_total").increment(1);

        self.broadcast_to_room(
            &room_id,
            ServerFrame::UserLeft {
                user_id: user_id.to_string(),
                username: connection.username.clone(),
                timestamp: Utc::now(),
            },
            None,
        )
        .await;

        let active_users = self.active_users(&room_id).await;
        self.broadcast_to_room(&room_id, ServerFrame::UserListUpdated { active_users }, None)
            .await;
    }

    /// Best-effort delivery to one user. A failed send tears down that
    /// recipient's connection and nothing else.
    pub async fn send_to_user(&self, user_id: &str, frame: ServerFrame) {
        let sender = {
            let connections = self.connections.read().await;
            connections.get(user_id).map(|c| c.sender.clone())
        };
        let Some(sender) = sender else {
            return;
        };
        if sender.send(frame).await.is_err() {
            tracing::warn!(user_id = %user_id, "Dropping connection after failed send");
            metrics::counter!("styx_send_failures_total").increment(1);
            Box::pin(self.disconnect(user_id)).await;
        }
    }

    /// Fan a frame out to a room. Iterates a stable snapshot of the
    /// membership set, so a disconnect racing this broadcast mutates the
    /// live set, never the copy being walked.
    pub async fn broadcast_to_room(
        &self,
        room_id: &str,
        frame: ServerFrame,
        exclude: Option<&str>,
    ) {
        let targets = self.member_snapshot(room_id).await;
        for user_id in targets {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            self.send_to_user(&user_id, frame.clone()).await;
        }
    }

    /// Presence list for a room: the synthetic AI entry first whenever at
    /// least one human is live, then humans sorted case-insensitively by
    /// username. Never includes a user without a live connection.
    pub async fn active_users(&self, room_id: &str) -> Vec<ActiveUser> {
        let ids = self.member_snapshot(room_id).await;
        let mut humans = Vec::new();
        {
            let connections = self.connections.read().await;
            for user_id in &ids {
                if let Some(connection) = connections.get(user_id) {
                    humans.push(ActiveUser {
                        user_id: user_id.clone(),
                        username: connection.username.clone(),
                    });
                }
            }
        }
        humans.sort_by(|a, b| {
            a.username
                .to_lowercase()
                .cmp(&b.username.to_lowercase())
        });

        let mut list = Vec::with_capacity(humans.len() + 1);
        if !humans.is_empty() {
            list.push(ActiveUser::ai());
        }
        list.extend(humans);
        list
    }

    /// Stable snapshot of a room's member ids.
    pub async fn room_members(&self, room_id: &str) -> Vec<String> {
        self.member_snapshot(room_id).await
    }

    pub async fn connection_info(&self, user_id: &str) -> Option<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections.get(user_id).map(|c| ConnectionInfo {
            user_id: user_id.to_string(),
            username: c.username.clone(),
            room_id: c.room_id.clone(),
            state: c.state,
        })
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn member_snapshot(&self, room_id: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(members) => members.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    async fn members_handle(&self, room_id: &str) -> Members {
        {
            let rooms = self.rooms.read().await;
            if let Some(members) = rooms.get(room_id) {
                return Arc::clone(members);
            }
        }
        let mut rooms = self.rooms.write().await;
        Arc::clone(
            rooms
                .entry(room_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(HashSet::new()))),
        )
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
