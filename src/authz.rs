//! Authorization directory
//!
//! Maps role names to a numeric rank (lower is more senior) and a set of
//! capabilities. Identity and role arrive pre-verified; this module only
//! answers "may this role do X".

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::models::WorkflowStatus;

/// Capabilities that can be granted to a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can join a document session and see its content
    Read,
    /// Can take block locks and change block content
    Edit,
    /// Can add comments
    Comment,
    /// Can approve, reject or request changes
    Approve,
    /// Full administrative access (includes all other capabilities)
    Admin,
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Capability::Read),
            "edit" => Ok(Capability::Edit),
            "comment" => Ok(Capability::Comment),
            "approve" => Ok(Capability::Approve),
            "admin" => Ok(Capability::Admin),
            _ => Err(format!("Invalid capability: {}", s)),
        }
    }
}

/// A set of capabilities with helper methods
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    capabilities: HashSet<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self {
            capabilities: HashSet::new(),
        }
    }

    /// Check if this set contains a capability (respects Admin override)
    pub fn has(&self, cap: Capability) -> bool {
        self.capabilities.contains(&Capability::Admin) || self.capabilities.contains(&cap)
    }

    pub fn add(&mut self, cap: Capability) {
        self.capabilities.insert(cap);
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(capabilities: Vec<Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

/// Lookups the collaboration engine needs from the outside world
pub trait AuthorizationDirectory: Send + Sync {
    /// Rank of a role, `None` if the role is unknown
    fn rank(&self, role: &str) -> Option<u32>;

    fn has_capability(&self, role: &str, capability: Capability) -> bool;

    /// Whether the role may change content while the document is in `status`
    fn can_edit_in(&self, role: &str, status: WorkflowStatus) -> bool {
        status.is_editable() && self.has_capability(role, Capability::Edit)
    }
}

/// Rank and permissions of one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePolicy {
    pub rank: u32,
    pub capabilities: CapabilitySet,
    /// Restricts editing to these statuses; all editable statuses when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_states: Option<Vec<WorkflowStatus>>,
}

impl RolePolicy {
    pub fn new(rank: u32, capabilities: Vec<Capability>) -> Self {
        Self {
            rank,
            capabilities: capabilities.into(),
            edit_states: None,
        }
    }

    pub fn editing_only_in(mut self, states: Vec<WorkflowStatus>) -> Self {
        self.edit_states = Some(states);
        self
    }
}

/// Table-driven directory, loaded from config or built from defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleDirectory {
    roles: HashMap<String, RolePolicy>,
}

impl RoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard newsroom hierarchy
    pub fn newsroom_defaults() -> Self {
        use Capability::*;

        let mut dir = Self::new();
        dir.insert(
            "editor_in_chief",
            RolePolicy::new(1, vec![Read, Edit, Comment, Approve, Admin]),
        );
        dir.insert(
            "communications_director",
            RolePolicy::new(2, vec![Read, Edit, Comment, Approve]),
        );
        dir.insert(
            "senior_editor",
            RolePolicy::new(3, vec![Read, Edit, Comment, Approve]),
        );
        dir.insert("editor", RolePolicy::new(4, vec![Read, Edit, Comment]));
        dir.insert("writer", RolePolicy::new(5, vec![Read, Edit, Comment]));
        dir.insert(
            "intern",
            RolePolicy::new(6, vec![Read, Edit, Comment])
                .editing_only_in(vec![WorkflowStatus::Draft]),
        );
        dir.insert("viewer", RolePolicy::new(7, vec![Read]));
        dir
    }

    /// Parse a JSON role table: `{ "role": { "rank": 1, "capabilities": [...] } }`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let dir = Self::from_json(&raw)?;
        tracing::info!("Loaded {} roles from {}", dir.roles.len(), path.display());
        Ok(dir)
    }

    pub fn insert(&mut self, role: impl Into<String>, policy: RolePolicy) {
        self.roles.insert(role.into(), policy);
    }
}

impl AuthorizationDirectory for RoleDirectory {
    fn rank(&self, role: &str) -> Option<u32> {
        self.roles.get(role).map(|p| p.rank)
    }

    fn has_capability(&self, role: &str, capability: Capability) -> bool {
        self.roles
            .get(role)
            .map(|p| p.capabilities.has(capability))
            .unwrap_or(false)
    }

    fn can_edit_in(&self, role: &str, status: WorkflowStatus) -> bool {
        let Some(policy) = self.roles.get(role) else {
            return false;
        };
        if !status.is_editable() || !policy.capabilities.has(Capability::Edit) {
            return false;
        }
        match &policy.edit_states {
            Some(states) => states.contains(&status),
            None => true,
        }
    }
}
