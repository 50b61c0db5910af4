//! Data models for documents, blocks and comments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document as held by the persistence gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub status: WorkflowStatus,
    pub blocks: Vec<Block>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing entry for a stored document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub status: WorkflowStatus,
    pub updated_at: DateTime<Utc>,
}

/// An addressable section of a document (headline, lede, quote, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    /// Opaque to the server; whatever the editor UI puts here
    pub content: serde_json::Value,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl Block {
    pub fn new(id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            content,
            version: 0,
            last_modified_by: None,
            last_modified_at: None,
        }
    }
}

/// Kind of communications document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PressRelease,
    Speech,
    SocialPost,
    Statement,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PressRelease => "press_release",
            DocumentKind::Speech => "speech",
            DocumentKind::SocialPost => "social_post",
            DocumentKind::Statement => "statement",
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "press_release" => Ok(DocumentKind::PressRelease),
            "speech" => Ok(DocumentKind::Speech),
            "social_post" => Ok(DocumentKind::SocialPost),
            "statement" => Ok(DocumentKind::Statement),
            _ => Err(format!("Invalid document kind: {}", s)),
        }
    }
}

/// Document-wide approval status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    RevisionRequested,
    Approved,
    Rejected,
    Locked,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "draft",
            WorkflowStatus::RevisionRequested => "revision_requested",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Rejected => "rejected",
            WorkflowStatus::Locked => "locked",
        }
    }

    /// Statuses in which block content may change at all
    pub fn is_editable(&self) -> bool {
        matches!(self, WorkflowStatus::Draft | WorkflowStatus::RevisionRequested)
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        WorkflowStatus::Draft
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "revision_requested" => Ok(WorkflowStatus::RevisionRequested),
            "approved" => Ok(WorkflowStatus::Approved),
            "rejected" => Ok(WorkflowStatus::Rejected),
            "locked" => Ok(WorkflowStatus::Locked),
            _ => Err(format!("Invalid workflow status: {}", s)),
        }
    }
}

/// Entry in a session's append-only comment log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Monotonic within a session, starting at 1
    pub id: u64,
    pub author: String,
    pub author_name: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Request to create a new document
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub id: Option<String>,
    pub title: String,
    #[serde(default = "default_kind")]
    pub kind: DocumentKind,
    /// Ordered block ids; content starts out empty
    pub blocks: Vec<String>,
}

fn default_kind() -> DocumentKind {
    DocumentKind::PressRelease
}
