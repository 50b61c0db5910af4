//! Wire protocol
//!
//! Clients send envelopes `{kind, documentId, senderId, payload}`; the
//! closed set of kinds is decoded into [`ClientMessage`]. The server answers
//! with [`ServerEvent`]s, tagged by `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::lock::BlockLockSnapshot;
use super::participant::Participant;
use super::workflow::ApprovalAction;
use crate::error::{CollabError, CollabResult};
use crate::models::{Block, Comment, WorkflowStatus};

/// Every kind a client may send
pub const MESSAGE_KINDS: [&str; 7] = [
    "join",
    "request-block-lock",
    "release-block-lock",
    "edit-block",
    "cursor",
    "comment",
    "approve",
];

/// Common frame of every inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub kind: String,
    pub document_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Parse a raw text frame
    pub fn parse(text: &str) -> CollabResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| CollabError::Protocol(format!("Invalid message: {}", e)))?;
        if envelope.document_id.is_empty() {
            return Err(CollabError::Protocol("documentId is empty".to_string()));
        }
        if envelope.sender_id.is_empty() {
            return Err(CollabError::Protocol("senderId is empty".to_string()));
        }
        Ok(envelope)
    }

    /// Decode the payload according to `kind`
    pub fn message(&self) -> CollabResult<ClientMessage> {
        let payload = self.payload.clone();
        let msg = match self.kind.as_str() {
            "join" => {
                let p: JoinPayload = decode(&self.kind, payload)?;
                ClientMessage::Join {
                    role: p.role,
                    display_name: p.display_name,
                }
            }
            "request-block-lock" => {
                let p: BlockPayload = decode(&self.kind, payload)?;
                ClientMessage::RequestBlockLock { block_id: p.block_id }
            }
            "release-block-lock" => {
                let p: BlockPayload = decode(&self.kind, payload)?;
                ClientMessage::ReleaseBlockLock { block_id: p.block_id }
            }
            "edit-block" => {
                let p: EditPayload = decode(&self.kind, payload)?;
                ClientMessage::EditBlock {
                    block_id: p.block_id,
                    content: p.content,
                }
            }
            "cursor" => {
                let p: CursorPayload = decode(&self.kind, payload)?;
                ClientMessage::Cursor {
                    position: p.position,
                }
            }
            "comment" => {
                let p: CommentPayload = decode(&self.kind, payload)?;
                ClientMessage::Comment {
                    text: p.text,
                    position: p.position,
                }
            }
            "approve" => {
                let p: ApprovePayload = decode(&self.kind, payload)?;
                ClientMessage::Approve { action: p.action }
            }
            other => {
                return Err(CollabError::Protocol(format!(
                    "Unknown message kind: {}",
                    other
                )))
            }
        };
        Ok(msg)
    }
}

fn decode<T: DeserializeOwned>(kind: &str, payload: serde_json::Value) -> CollabResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| CollabError::Protocol(format!("Invalid '{}' payload: {}", kind, e)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload {
    role: String,
    display_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockPayload {
    block_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditPayload {
    block_id: String,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct CursorPayload {
    position: serde_json::Value,
}

#[derive(Deserialize)]
struct CommentPayload {
    text: String,
    #[serde(default)]
    position: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ApprovePayload {
    action: ApprovalAction,
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Join { role: String, display_name: String },
    RequestBlockLock { block_id: String },
    ReleaseBlockLock { block_id: String },
    EditBlock {
        block_id: String,
        content: serde_json::Value,
    },
    Cursor { position: serde_json::Value },
    Comment {
        text: String,
        position: Option<serde_json::Value>,
    },
    Approve { action: ApprovalAction },
}

/// Full view of a session, sent on join
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub document_id: String,
    pub title: String,
    pub blocks: Vec<Block>,
    pub roster: Vec<Participant>,
    pub locks: Vec<BlockLockSnapshot>,
    pub status: WorkflowStatus,
    pub version: u64,
    pub comments: Vec<Comment>,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Snapshot for a participant who just joined
    DocumentState(DocumentState),
    BlockLocked {
        document_id: String,
        block_id: String,
        holder: String,
    },
    BlockUnlocked {
        document_id: String,
        block_id: String,
    },
    /// Released lock handed to the next in line
    BlockTransferred {
        document_id: String,
        block_id: String,
        holder: String,
    },
    StaleLockReleased {
        document_id: String,
        block_id: String,
        /// Seconds since the holder's last activity
        idle_duration: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_holder: Option<String>,
    },
    EmergencyUnlock {
        document_id: String,
        block_id: String,
        by: String,
    },
    BlockUpdated {
        document_id: String,
        block_id: String,
        content: serde_json::Value,
        version: u64,
        author: String,
    },
    UserJoined {
        document_id: String,
        user_id: String,
        roster: Vec<Participant>,
    },
    UserLeft {
        document_id: String,
        user_id: String,
        roster: Vec<Participant>,
    },
    CommentAdded {
        document_id: String,
        comment: Comment,
    },
    StatusChanged {
        document_id: String,
        old_status: WorkflowStatus,
        new_status: WorkflowStatus,
        approver: String,
    },
    /// Sent only to the requester
    LockQueued {
        document_id: String,
        block_id: String,
        position: usize,
    },
    /// Sent only to the evicted holder
    LockPreempted {
        document_id: String,
        block_id: String,
        holder: String,
    },
    CursorMoved {
        document_id: String,
        user_id: String,
        position: serde_json::Value,
    },
    /// Removed from the session by an administrator
    Disconnected {
        document_id: String,
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(err: &CollabError) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize event: {}", e);
            r#"{"type":"error","message":"internal serialization failure"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: &str, payload: serde_json::Value) -> Envelope {
        Envelope {
            kind: kind.to_string(),
            document_id: "doc-1".to_string(),
            sender_id: "u1".to_string(),
            payload,
        }
    }

    #[test]
    fn test_parse_envelope() {
        let text = json!({
            "kind": "request-block-lock",
            "documentId": "doc-1",
            "senderId": "u1",
            "payload": {"blockId": "headline"}
        })
        .to_string();
        let env = Envelope::parse(&text).unwrap();
        assert_eq!(env.document_id, "doc-1");
        assert_eq!(
            env.message().unwrap(),
            ClientMessage::RequestBlockLock {
                block_id: "headline".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Envelope::parse("not json"),
            Err(CollabError::Protocol(_))
        ));
        let missing_sender = json!({"kind": "join", "documentId": "d"}).to_string();
        assert!(Envelope::parse(&missing_sender).is_err());
        let empty_doc = json!({"kind": "join", "documentId": "", "senderId": "u"}).to_string();
        assert!(Envelope::parse(&empty_doc).is_err());
    }

    #[test]
    fn test_unknown_kind() {
        let err = envelope("delete-document", json!({})).message().unwrap_err();
        assert_eq!(
            err,
            CollabError::Protocol("Unknown message kind: delete-document".into())
        );
    }

    #[test]
    fn test_missing_payload_fields() {
        assert!(envelope("join", json!({"role": "writer"})).message().is_err());
        assert!(envelope("edit-block", json!({"blockId": "b"})).message().is_err());
        assert!(envelope("cursor", json!({})).message().is_err());
        assert!(envelope("approve", json!({"action": "publish"}))
            .message()
            .is_err());
        assert!(envelope("request-block-lock", serde_json::Value::Null)
            .message()
            .is_err());
    }

    #[test]
    fn test_every_kind_decodes() {
        let payloads = [
            json!({"role": "writer", "displayName": "Ann"}),
            json!({"blockId": "b"}),
            json!({"blockId": "b"}),
            json!({"blockId": "b", "content": {"text": "hi"}}),
            json!({"position": {"blockId": "b", "offset": 1}}),
            json!({"text": "nice", "position": null}),
            json!({"action": "request_changes"}),
        ];
        for (kind, payload) in MESSAGE_KINDS.iter().zip(payloads) {
            assert!(
                envelope(kind, payload).message().is_ok(),
                "kind {} failed",
                kind
            );
        }
    }

    #[test]
    fn test_comment_position_optional() {
        let msg = envelope("comment", json!({"text": "tighten this"}))
            .message()
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Comment {
                text: "tighten this".into(),
                position: None
            }
        );
    }

    #[test]
    fn test_event_wire_format() {
        let event = ServerEvent::StaleLockReleased {
            document_id: "doc-1".into(),
            block_id: "lede".into(),
            idle_duration: 400,
            new_holder: None,
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["type"], "stale_lock_released");
        assert_eq!(json["blockId"], "lede");
        assert_eq!(json["idleDuration"], 400);
        assert!(json.get("newHolder").is_none());

        let event = ServerEvent::StatusChanged {
            document_id: "doc-1".into(),
            old_status: WorkflowStatus::Draft,
            new_status: WorkflowStatus::RevisionRequested,
            approver: "chief".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["oldStatus"], "draft");
        assert_eq!(json["newStatus"], "revision_requested");
    }

    #[test]
    fn test_error_event() {
        let event = ServerEvent::error(&CollabError::NotFound("doc-9".into()));
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "Not found: doc-9");
    }
}
