//! Wire types for the newsroom protocol
//!
//! These mirror the server's protocol. Some fields are not used directly by
//! the CLI but are part of the complete protocol.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound frame
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub kind: String,
    pub document_id: String,
    pub sender_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub content: serde_json::Value,
    pub version: u64,
    #[serde(default)]
    pub last_modified_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    pub rank: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHolder {
    pub user_id: String,
    pub rank: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockLock {
    pub block_id: String,
    pub holder: Option<LockHolder>,
    #[serde(default)]
    pub queue: Vec<LockHolder>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Events from the server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    DocumentState {
        document_id: String,
        title: String,
        blocks: Vec<Block>,
        roster: Vec<Participant>,
        locks: Vec<BlockLock>,
        status: String,
        version: u64,
        comments: Vec<Comment>,
    },
    BlockLocked {
        document_id: String,
        block_id: String,
        holder: String,
    },
    BlockUnlocked {
        document_id: String,
        block_id: String,
    },
    BlockTransferred {
        document_id: String,
        block_id: String,
        holder: String,
    },
    StaleLockReleased {
        document_id: String,
        block_id: String,
        idle_duration: i64,
        #[serde(default)]
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
        old_status: String,
        new_status: String,
        approver: String,
    },
    LockQueued {
        document_id: String,
        block_id: String,
        position: usize,
    },
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
    Disconnected {
        document_id: String,
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    /// Blocks a snapshot shows as held by `user_id`
    pub fn locks_held_by(&self, user_id: &str) -> Vec<String> {
        match self {
            ServerEvent::DocumentState { locks, .. } => locks
                .iter()
                .filter(|l| l.holder.as_ref().is_some_and(|h| h.user_id == user_id))
                .map(|l| l.block_id.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// One-line rendering for `watch`
    pub fn describe(&self) -> String {
        match self {
            ServerEvent::DocumentState {
                title,
                blocks,
                roster,
                status,
                ..
            } => format!(
                "joined \"{}\" [{}]: {} blocks, {} online",
                title,
                status,
                blocks.len(),
                roster.len()
            ),
            ServerEvent::BlockLocked { block_id, holder, .. } => {
                format!("{} locked by {}", block_id, holder)
            }
            ServerEvent::BlockUnlocked { block_id, .. } => format!("{} unlocked", block_id),
            ServerEvent::BlockTransferred { block_id, holder, .. } => {
                format!("{} handed to {}", block_id, holder)
            }
            ServerEvent::StaleLockReleased {
                block_id,
                idle_duration,
                new_holder,
                ..
            } => match new_holder {
                Some(holder) => format!(
                    "{} reclaimed after {}s idle, now held by {}",
                    block_id, idle_duration, holder
                ),
                None => format!("{} reclaimed after {}s idle", block_id, idle_duration),
            },
            ServerEvent::EmergencyUnlock { block_id, by, .. } => {
                format!("{} force-unlocked by {}", block_id, by)
            }
            ServerEvent::BlockUpdated {
                block_id,
                content,
                version,
                author,
                ..
            } => format!("{} v{} by {}: {}", block_id, version, author, content),
            ServerEvent::UserJoined { user_id, roster, .. } => {
                format!("{} joined ({} online)", user_id, roster.len())
            }
            ServerEvent::UserLeft { user_id, roster, .. } => {
                format!("{} left ({} online)", user_id, roster.len())
            }
            ServerEvent::CommentAdded { comment, .. } => {
                format!("#{} {}: {}", comment.id, comment.author_name, comment.text)
            }
            ServerEvent::StatusChanged {
                old_status,
                new_status,
                approver,
                ..
            } => format!("status {} -> {} by {}", old_status, new_status, approver),
            ServerEvent::LockQueued { block_id, position, .. } => {
                format!("queued for {} at position {}", block_id, position)
            }
            ServerEvent::LockPreempted { block_id, holder, .. } => {
                format!("lost {} to {}", block_id, holder)
            }
            ServerEvent::CursorMoved { user_id, position, .. } => {
                format!("{} cursor at {}", user_id, position)
            }
            ServerEvent::Disconnected { reason, .. } => format!("disconnected: {}", reason),
            ServerEvent::Error { message } => format!("error: {}", message),
        }
    }
}
