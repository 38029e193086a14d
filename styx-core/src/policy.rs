// ABOUTME: Pure room access decisions.
// ABOUTME: Visibility is a function of (room, user, role, account class) with no hidden state.

use serde::{Deserialize, Serialize};

use crate::rooms::Room;

/// Chat-relevant role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            _ => anyhow::bail!("Unknown role: {}", s),
        }
    }
}

/// Decides room visibility. `default_room_id` is the safe landing room that
/// restricted accounts may always enter.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    default_room_id: String,
}

impl AccessPolicy {
    pub fn new(default_room_id: impl Into<String>) -> Self {
        Self {
            default_room_id: default_room_id.into(),
        }
    }

    pub fn default_room_id(&self) -> &str {
        &self.default_room_id
    }

    /// Evaluated in priority order: admins see everything; restricted
    /// accounts see the default room plus explicit assignments; everyone
    /// else sees non-private rooms plus explicit assignments.
    pub fn can_access(&self, room: &Room, user_id: &str, role: Role, restricted: bool) -> bool {
        if role == Role::Admin {
            return true;
        }

        let assigned = room.assigned_users.iter().any(|u| u == user_id);
        if restricted {
            return room.room_id == self.default_room_id || assigned;
        }

        !room.is_private || assigned
    }

    /// Filter rooms through `can_access`, newest created first.
    pub fn accessible_rooms(
        &self,
        rooms: Vec<Room>,
        user_id: &str,
        role: Role,
        restricted: bool,
    ) -> Vec<Room> {
        let mut accessible: Vec<Room> = rooms
            .into_iter()
            .filter(|room| self.can_access(room, user_id, role, restricted))
            .collect();
        accessible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        accessible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::str::FromStr;

    fn room(room_id: &str, is_private: bool, assigned: &[&str]) -> Room {
        Room {
            room_id: room_id.to_string(),
            name: room_id.to_string(),
            description: None,
            created_at: Utc::now(),
            is_private,
            assigned_users: assigned.iter().map(|s| s.to_string()).collect(),
            ai_prompt: None,
            ai_model: None,
            voice_enabled: false,
            voice_id: String::new(),
            created_by: None,
        }
    }

    fn policy() -> AccessPolicy {
        AccessPolicy::new("general")
    }

    #[test]
    fn test_admin_can_access_everything() {
        let p = policy();
        let private = room("secret", true, &[]);
        assert!(p.can_access(&private, "u1", Role::Admin, false));
        assert!(p.can_access(&private, "u1", Role::Admin, true));
    }

    #[test]
    fn test_private_room_requires_assignment() {
        let p = policy();
        let assigned = room("secret", true, &["u1"]);
        let unassigned = room("secret", true, &[]);
        assert!(p.can_access(&assigned, "u1", Role::User, false));
        assert!(!p.can_access(&unassigned, "u1", Role::User, false));
    }

    #[test]
    fn test_public_room_is_open_to_regular_users() {
        let p = policy();
        let public = room("lounge", false, &[]);
        assert!(p.can_access(&public, "u1", Role::User, false));
    }

    #[test]
    fn test_restricted_account_gets_default_room_and_assignments_only() {
        let p = policy();
        let default = room("general", false, &[]);
        let public = room("lounge", false, &[]);
        let assigned = room("club", true, &["u1"]);

        assert!(p.can_access(&default, "u1", Role::User, true));
        assert!(!p.can_access(&public, "u1", Role::User, true));
        assert!(p.can_access(&assigned, "u1", Role::User, true));
    }

    #[test]
    fn test_accessible_rooms_filters_and_sorts_newest_first() {
        let p = policy();
        let mut older = room("older", false, &[]);
        older.created_at = Utc::now() - Duration::hours(2);
        let newer = room("newer", false, &[]);
        let hidden = room("hidden", true, &[]);

        let result = p.accessible_rooms(vec![older, hidden, newer], "u1", Role::User, false);
        let ids: Vec<&str> = result.iter().map(|r| r.room_id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
    }

    #[test]
    fn test_role_parse_round_trip() {
        assert_eq!(Role::from_str("admin").unwrap(), Role::Admin);
        assert_eq!(Role::from_str("user").unwrap(), Role::User);
        assert!(Role::from_str("owner").is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }
}
