// ABOUTME: Durable room metadata storage backed by SQLite.
// ABOUTME: Rooms carry the access-policy inputs (privacy, assignments) plus AI and voice overrides.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Default voice used for rooms with readback enabled.
pub const DEFAULT_VOICE_ID: &str = "N2lVS1w4EtoT3dr4eOWO";

/// A chat room record. Membership of live connections is tracked by the
/// registry; `assigned_users` is the persisted authorization list and is
/// independent of liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_private: bool,
    pub assigned_users: Vec<String>,
    /// Room-specific system prompt override for the AI participant.
    pub ai_prompt: Option<String>,
    /// Room-specific model override for the AI participant.
    pub ai_model: Option<String>,
    pub voice_enabled: bool,
    pub voice_id: String,
    pub created_by: Option<String>,
}

/// Fields for creating a room. `created_at` is stamped by the store.
#[derive(Debug, Clone, Default)]
pub struct NewRoom {
    pub room_id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub assigned_users: Vec<String>,
    pub ai_prompt: Option<String>,
    pub ai_model: Option<String>,
    pub voice_enabled: bool,
    pub voice_id: Option<String>,
    pub created_by: Option<String>,
}

/// Field-wise update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub ai_prompt: Option<String>,
    pub ai_model: Option<String>,
    pub voice_enabled: Option<bool>,
    pub voice_id: Option<String>,
    pub is_private: Option<bool>,
    pub assigned_users: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct RoomStore {
    db: Arc<Mutex<Connection>>,
}

impl RoomStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
        let db_path = data_dir.join("rooms.db");
        let conn = Connection::open(&db_path).context("Failed to open SQLite database")?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rooms (
                room_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                is_private INTEGER NOT NULL DEFAULT 0,
                assigned_users TEXT NOT NULL DEFAULT '[]',
                ai_prompt TEXT,
                ai_model TEXT,
                voice_enabled INTEGER NOT NULL DEFAULT 0,
                voice_id TEXT NOT NULL,
                created_by TEXT
            )",
            [],
        )
        .context("Failed to create rooms table")?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }

    fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Room, String)> {
        let created_at: String = row.get(3)?;
        let assigned_users: String = row.get(5)?;
        let room = Room {
            room_id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_default(),
            is_private: row.get::<_, i32>(4)? != 0,
            assigned_users: Vec::new(),
            ai_prompt: row.get(6)?,
            ai_model: row.get(7)?,
            voice_enabled: row.get::<_, i32>(8)? != 0,
            voice_id: row.get(9)?,
            created_by: row.get(10)?,
        };
        Ok((room, assigned_users))
    }

    const SELECT_COLUMNS: &'static str = "room_id, name, description, created_at, is_private, \
         assigned_users, ai_prompt, ai_model, voice_enabled, voice_id, created_by";

    pub fn create_room(&self, new: NewRoom) -> Result<Room> {
        if new.room_id.trim().is_empty() {
            anyhow::bail!("Room id must not be empty");
        }
        if new.name.trim().is_empty() {
            anyhow::bail!("Room name must not be empty");
        }

        let room = Room {
            room_id: new.room_id,
            name: new.name,
            description: new.description,
            created_at: Utc::now(),
            is_private: new.is_private,
            assigned_users: new.assigned_users,
            ai_prompt: new.ai_prompt,
            ai_model: new.ai_model,
            voice_enabled: new.voice_enabled,
            voice_id: new.voice_id.unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
            created_by: new.created_by,
        };

        let assigned = serde_json::to_string(&room.assigned_users)
            .context("Failed to serialize assigned users")?;
        let db = self.lock()?;
        db.execute(
            "INSERT INTO rooms (room_id, name, description, created_at, is_private, \
             assigned_users, ai_prompt, ai_model, voice_enabled, voice_id, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                room.room_id,
                room.name,
                room.description,
                room.created_at.to_rfc3339(),
                room.is_private as i32,
                assigned,
                room.ai_prompt,
                room.ai_model,
                room.voice_enabled as i32,
                room.voice_id,
                room.created_by,
            ],
        )
        .context("Failed to insert room")?;

        tracing::info!(
            room_id = %room.room_id,
            name = %room.name,
            is_private = room.is_private,
            "Created room"
        );
        Ok(room)
    }

    pub fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM rooms WHERE room_id = ?1",
            Self::SELECT_COLUMNS
        ))?;

        let result = stmt.query_row(params![room_id], Self::row_to_room);
        match result {
            Ok((mut room, assigned)) => {
                room.assigned_users = serde_json::from_str(&assigned).unwrap_or_default();
                Ok(Some(room))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_rooms(&self) -> Result<Vec<Room>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM rooms ORDER BY created_at DESC",
            Self::SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_room)?;

        let mut rooms = Vec::new();
        for row in rows {
            let (mut room, assigned) = row?;
            room.assigned_users = serde_json::from_str(&assigned).unwrap_or_default();
            rooms.push(room);
        }
        Ok(rooms)
    }

    /// Apply a field-wise patch. Returns the updated room, or None when the
    /// room does not exist.
    pub fn update_room(&self, room_id: &str, patch: RoomPatch) -> Result<Option<Room>> {
        let Some(mut room) = self.get_room(room_id)? else {
            return Ok(None);
        };

        if let Some(name) = patch.name {
            room.name = name;
        }
        if let Some(description) = patch.description {
            room.description = Some(description);
        }
        if let Some(ai_prompt) = patch.ai_prompt {
            room.ai_prompt = Some(ai_prompt);
        }
        if let Some(ai_model) = patch.ai_model {
            room.ai_model = Some(ai_model);
        }
        if let Some(voice_enabled) = patch.voice_enabled {
            room.voice_enabled = voice_enabled;
        }
        if let Some(voice_id) = patch.voice_id {
            room.voice_id = voice_id;
        }
        if let Some(is_private) = patch.is_private {
            room.is_private = is_private;
        }
        if let Some(assigned_users) = patch.assigned_users {
            room.assigned_users = assigned_users;
        }

        self.persist(&room)?;
        tracing::info!(room_id = %room.room_id, "Updated room");
        Ok(Some(room))
    }

    fn persist(&self, room: &Room) -> Result<()> {
        let assigned = serde_json::to_string(&room.assigned_users)
            .context("Failed to serialize assigned users")?;
        let db = self.lock()?;
        db.execute(
            "UPDATE rooms SET name = ?2, description = ?3, is_private = ?4, \
             assigned_users = ?5, ai_prompt = ?6, ai_model = ?7, voice_enabled = ?8, \
             voice_id = ?9 WHERE room_id = ?1",
            params![
                room.room_id,
                room.name,
                room.description,
                room.is_private as i32,
                assigned,
                room.ai_prompt,
                room.ai_model,
                room.voice_enabled as i32,
                room.voice_id,
            ],
        )
        .context("Failed to update room")?;
        Ok(())
    }

    /// Remove a room record. Returns false when the room was absent.
    pub fn delete_room(&self, room_id: &str) -> Result<bool> {
        let db = self.lock()?;
        let affected = db
            .execute("DELETE FROM rooms WHERE room_id = ?1", params![room_id])
            .context("Failed to delete room")?;
        Ok(affected > 0)
    }

    /// Idempotently add a user to the room's authorization list.
    pub fn assign_user(&self, room_id: &str, user_id: &str) -> Result<bool> {
        let Some(mut room) = self.get_room(room_id)? else {
            return Ok(false);
        };
        if !room.assigned_users.iter().any(|u| u == user_id) {
            room.assigned_users.push(user_id.to_string());
            self.persist(&room)?;
            tracing::info!(room_id = %room_id, user_id = %user_id, "Assigned user to room");
        }
        Ok(true)
    }

    /// Idempotently remove a user from the authorization list; removing an
    /// absent entry is a no-op.
    pub fn unassign_user(&self, room_id: &str, user_id: &str) -> Result<bool> {
        let Some(mut room) = self.get_room(room_id)? else {
            return Ok(false);
        };
        let before = room.assigned_users.len();
        room.assigned_users.retain(|u| u != user_id);
        if room.assigned_users.len() != before {
            self.persist(&room)?;
            tracing::info!(room_id = %room_id, user_id = %user_id, "Unassigned user from room");
        }
        Ok(true)
    }

    /// Create the default room on startup if it does not exist yet.
    pub fn ensure_default_room(&self, room_id: &str, name: &str) -> Result<()> {
        if self.get_room(room_id)?.is_some() {
            return Ok(());
        }
        self.create_room(NewRoom {
            room_id: room_id.to_string(),
            name: name.to_string(),
            description: Some("Default chat room for all users".to_string()),
            voice_enabled: true,
            ..NewRoom::default()
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RoomStore {
        RoomStore::in_memory().unwrap()
    }

    fn new_room(room_id: &str) -> NewRoom {
        NewRoom {
            room_id: room_id.to_string(),
            name: format!("Room {}", room_id),
            ..NewRoom::default()
        }
    }

    #[test]
    fn test_create_and_get_room() {
        let store = store();
        store.create_room(new_room("lounge")).unwrap();

        let room = store.get_room("lounge").unwrap().unwrap();
        assert_eq!(room.name, "Room lounge");
        assert!(!room.is_private);
        assert_eq!(room.voice_id, DEFAULT_VOICE_ID);
        assert!(store.get_room("missing").unwrap().is_none());
    }

    #[test]
    fn test_create_room_rejects_empty_fields() {
        let store = store();
        assert!(store
            .create_room(NewRoom {
                room_id: " ".to_string(),
                name: "x".to_string(),
                ..NewRoom::default()
            })
            .is_err());
        assert!(store
            .create_room(NewRoom {
                room_id: "x".to_string(),
                name: "".to_string(),
                ..NewRoom::default()
            })
            .is_err());
    }

    #[test]
    fn test_update_room_patch_applies_only_given_fields() {
        let store = store();
        store.create_room(new_room("lounge")).unwrap();

        let updated = store
            .update_room(
                "lounge",
                RoomPatch {
                    ai_prompt: Some("be brief".to_string()),
                    is_private: Some(true),
                    ..RoomPatch::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Room lounge");
        assert_eq!(updated.ai_prompt.as_deref(), Some("be brief"));
        assert!(updated.is_private);

        assert!(store
            .update_room("missing", RoomPatch::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_assign_and_unassign_are_idempotent() {
        let store = store();
        store.create_room(new_room("lounge")).unwrap();

        assert!(store.assign_user("lounge", "u1").unwrap());
        assert!(store.assign_user("lounge", "u1").unwrap());
        let room = store.get_room("lounge").unwrap().unwrap();
        assert_eq!(room.assigned_users, vec!["u1"]);

        assert!(store.unassign_user("lounge", "u1").unwrap());
        assert!(store.unassign_user("lounge", "u1").unwrap());
        let room = store.get_room("lounge").unwrap().unwrap();
        assert!(room.assigned_users.is_empty());

        assert!(!store.assign_user("missing", "u1").unwrap());
    }

    #[test]
    fn test_list_rooms_newest_first() {
        let store = store();
        store.create_room(new_room("first")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create_room(new_room("second")).unwrap();

        let rooms = store.list_rooms().unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].room_id, "second");
        assert_eq!(rooms[1].room_id, "first");
    }

    #[test]
    fn test_delete_room() {
        let store = store();
        store.create_room(new_room("lounge")).unwrap();
        assert!(store.delete_room("lounge").unwrap());
        assert!(!store.delete_room("lounge").unwrap());
        assert!(store.get_room("lounge").unwrap().is_none());
    }

    #[test]
    fn test_ensure_default_room_is_idempotent() {
        let store = store();
        store.ensure_default_room("general", "General Chat").unwrap();
        store.ensure_default_room("general", "General Chat").unwrap();
        let room = store.get_room("general").unwrap().unwrap();
        assert_eq!(room.name, "General Chat");
        assert!(room.voice_enabled);
        assert_eq!(store.list_rooms().unwrap().len(), 1);
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RoomStore::new(dir.path()).unwrap();
            store.create_room(new_room("durable")).unwrap();
        }
        let store = RoomStore::new(dir.path()).unwrap();
        assert!(store.get_room("durable").unwrap().is_some());
    }
}
