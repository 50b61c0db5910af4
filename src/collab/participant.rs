//! Participant model for presence tracking
//!
//! A participant is one identity connected to one document session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::ServerEvent;

/// Predefined colors for participant cursors
const PARTICIPANT_COLORS: [&str; 8] = [
    "#FF6B6B", // Red
    "#4ECDC4", // Teal
    "#45B7D1", // Blue
    "#96CEB4", // Green
    "#FFEAA7", // Yellow
    "#DDA0DD", // Plum
    "#98D8C8", // Mint
    "#F7DC6F", // Gold
];

/// Outbound half of a client's transport
#[derive(Debug, Clone)]
pub struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// A connection with its receiving end, handy for tests and in-process clients
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Best-effort delivery; false once the client has gone away
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A participant in a document session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    /// Derived from the role; lower is more senior
    pub rank: u32,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<serde_json::Value>,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip)]
    pub connection: Connection,
}

impl Participant {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        role: impl Into<String>,
        rank: u32,
        connection: Connection,
    ) -> Self {
        let user_id = user_id.into();
        let now = Utc::now();
        let color = color_for(&user_id);

        Self {
            user_id,
            display_name: display_name.into(),
            role: role.into(),
            rank,
            color,
            cursor: None,
            joined_at: now,
            last_activity: now,
            connection,
        }
    }

    pub fn set_cursor(&mut self, position: serde_json::Value, now: DateTime<Utc>) {
        self.cursor = Some(position);
        self.touch(now);
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

/// Deterministic per identity, so a user keeps their color across rejoins
fn color_for(user_id: &str) -> String {
    let sum = user_id.bytes().fold(0usize, |acc, b| acc.wrapping_add(b as usize));
    PARTICIPANT_COLORS[sum % PARTICIPANT_COLORS.len()].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(user_id: &str) -> Participant {
        let (conn, _rx) = Connection::channel();
        Participant::new(user_id, "Alice", "writer", 5, conn)
    }

    #[test]
    fn test_participant_new() {
        let p = participant("u1");
        assert_eq!(p.user_id, "u1");
        assert_eq!(p.rank, 5);
        assert!(p.cursor.is_none());
        assert!(!p.color.is_empty());
    }

    #[test]
    fn test_color_deterministic() {
        assert_eq!(participant("same").color, participant("same").color);
    }

    #[test]
    fn test_set_cursor_touches() {
        let mut p = participant("u1");
        let later = p.last_activity + chrono::Duration::seconds(5);
        p.set_cursor(serde_json::json!({"blockId": "lede", "offset": 3}), later);
        assert_eq!(p.last_activity, later);
        assert_eq!(p.cursor.as_ref().unwrap()["offset"], 3);
    }

    #[test]
    fn test_serialization_skips_connection() {
        let p = participant("u1");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["displayName"], "Alice");
        assert!(json.get("connection").is_none());
        assert!(json.get("cursor").is_none());
    }

    #[test]
    fn test_connection_send_after_drop() {
        let (conn, rx) = Connection::channel();
        assert!(conn.send(ServerEvent::Error {
            message: "hi".into()
        }));
        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.send(ServerEvent::Error {
            message: "gone".into()
        }));
    }
}
