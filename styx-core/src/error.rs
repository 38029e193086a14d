// ABOUTME: Connection handshake refusal taxonomy.
// ABOUTME: Each variant carries the WebSocket close code the transport must use.

/// Why a connection attempt was refused before admission.
///
/// These are the only failures allowed to hard-close a socket. Everything
/// after admission is best-effort per recipient and never tears down a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectRefusal {
    /// Token did not resolve to a user.
    AuthenticationFailed,
    /// Room policy denied the user.
    AccessDenied,
    /// No such room.
    RoomNotFound,
    /// Unexpected failure while evaluating access.
    PermissionCheck(String),
}

impl ConnectRefusal {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::AuthenticationFailed => 4001,
            Self::AccessDenied => 4003,
            Self::RoomNotFound => 4004,
            Self::PermissionCheck(_) => 4005,
        }
    }

    /// Short reason string carried on the close frame.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "Authentication failed",
            Self::AccessDenied => "Access denied to this room",
            Self::RoomNotFound => "Room not found",
            Self::PermissionCheck(_) => "Permission check failed",
        }
    }
}

impl std::fmt::Display for ConnectRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionCheck(detail) => write!(f, "{}: {}", self.reason(), detail),
            _ => f.write_str(self.reason()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes_are_distinct() {
        let codes = [
            ConnectRefusal::AuthenticationFailed.close_code(),
            ConnectRefusal::AccessDenied.close_code(),
            ConnectRefusal::RoomNotFound.close_code(),
            ConnectRefusal::PermissionCheck("boom".to_string()).close_code(),
        ];
        let mut deduped = codes.to_vec();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len());
    }

    #[test]
    fn test_permission_check_display_includes_detail() {
        let refusal = ConnectRefusal::PermissionCheck("db unavailable".to_string());
        assert!(refusal.to_string().contains("db unavailable"));
    }
}
