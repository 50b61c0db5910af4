//! Document session: the live coordination context for one document
//!
//! Holds the roster, blocks, comment log, workflow status and lock table.
//! Every method runs under the coordinator's per-session guard, and every
//! event it produces is delivered before the guard is released, so each
//! participant sees a session's events in the order they were generated.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::lock::{
    BlockLockSnapshot, LockEvent, LockOutcome, LockPolicy, LockTable, Requester, StaleLock,
};
use super::participant::Participant;
use super::protocol::{DocumentState, ServerEvent};
use super::workflow::{ApprovalAction, Transition, Workflow};
use crate::authz::{AuthorizationDirectory, Capability};
use crate::error::{CollabError, CollabResult};
use crate::models::{Block, Comment, DocumentRecord, WorkflowStatus};

/// Administrative view of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub document_id: String,
    pub title: String,
    pub status: WorkflowStatus,
    pub version: u64,
    pub participants: Vec<Participant>,
    pub locks: Vec<BlockLockSnapshot>,
    pub queued_requests: usize,
    pub comment_count: usize,
    pub opened_at: DateTime<Utc>,
}

pub struct DocumentSession {
    document_id: String,
    title: String,
    roster: BTreeMap<String, Participant>,
    blocks: Vec<Block>,
    comments: Vec<Comment>,
    workflow: Workflow,
    version: u64,
    locks: LockTable,
    opened_at: DateTime<Utc>,
    closed: bool,
    /// Serializes snapshot-and-write so stores see saves in snapshot order
    persist: Arc<Mutex<()>>,
}

impl DocumentSession {
    pub fn from_record(record: DocumentRecord, policy: LockPolicy) -> Self {
        let locks = LockTable::new(policy, record.blocks.iter().map(|b| b.id.clone()));
        let version = record.blocks.iter().map(|b| b.version).sum();

        Self {
            document_id: record.id,
            title: record.title,
            roster: BTreeMap::new(),
            blocks: record.blocks,
            comments: Vec::new(),
            workflow: Workflow::new(record.status),
            version,
            locks,
            opened_at: Utc::now(),
            closed: false,
            persist: Arc::new(Mutex::new(())),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.workflow.status()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn persist_lock(&self) -> Arc<Mutex<()>> {
        self.persist.clone()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.roster.get(user_id)
    }

    pub fn participant_count(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// A closed session has been removed from the coordinator; joins retry
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    fn roster_view(&self) -> Vec<Participant> {
        self.roster.values().cloned().collect()
    }

    pub fn snapshot(&self) -> DocumentState {
        DocumentState {
            document_id: self.document_id.clone(),
            title: self.title.clone(),
            blocks: self.blocks.clone(),
            roster: self.roster_view(),
            locks: self.locks.snapshot(),
            status: self.workflow.status(),
            version: self.version,
            comments: self.comments.clone(),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            document_id: self.document_id.clone(),
            title: self.title.clone(),
            status: self.workflow.status(),
            version: self.version,
            participants: self.roster_view(),
            locks: self.locks.snapshot(),
            queued_requests: self.locks.queued_count(),
            comment_count: self.comments.len(),
            opened_at: self.opened_at,
        }
    }

    /// Deliver to every connected participant except `excluding`
    pub fn broadcast(&self, event: ServerEvent, excluding: Option<&str>) {
        for (user_id, participant) in &self.roster {
            if excluding == Some(user_id.as_str()) {
                continue;
            }
            if !participant.connection.send(event.clone()) {
                tracing::debug!(user_id = %user_id, "Skipping closed connection");
            }
        }
    }

    pub fn send_to(&self, user_id: &str, event: ServerEvent) -> bool {
        self.roster
            .get(user_id)
            .map(|p| p.connection.send(event))
            .unwrap_or(false)
    }

    /// Add (or re-add) a participant; sends them the snapshot and tells the others
    pub fn join(&mut self, participant: Participant) -> DocumentState {
        let user_id = participant.user_id.clone();
        if self.roster.insert(user_id.clone(), participant).is_some() {
            tracing::info!(document_id = %self.document_id, user_id = %user_id, "Participant rejoined");
        } else {
            tracing::info!(document_id = %self.document_id, user_id = %user_id, "Participant joined");
        }

        let state = self.snapshot();
        self.send_to(&user_id, ServerEvent::DocumentState(state.clone()));
        self.broadcast(
            ServerEvent::UserJoined {
                document_id: self.document_id.clone(),
                user_id: user_id.clone(),
                roster: state.roster.clone(),
            },
            Some(&user_id),
        );
        state
    }

    /// Remove a participant, releasing or transferring everything they held
    pub fn leave(&mut self, user_id: &str, now: DateTime<Utc>) -> Option<Participant> {
        let removed = self.roster.remove(user_id)?;

        let released = self.locks.release_all_held_by(user_id, now);
        self.flush_lock_events();
        tracing::info!(
            document_id = %self.document_id,
            user_id,
            released,
            "Participant left"
        );

        self.broadcast(
            ServerEvent::UserLeft {
                document_id: self.document_id.clone(),
                user_id: user_id.to_string(),
                roster: self.roster_view(),
            },
            None,
        );
        Some(removed)
    }

    fn member(&self, user_id: &str) -> CollabResult<&Participant> {
        self.roster.get(user_id).ok_or_else(|| {
            CollabError::NotFound(format!(
                "{} has not joined document {}",
                user_id, self.document_id
            ))
        })
    }

    fn touch(&mut self, user_id: &str, now: DateTime<Utc>) {
        if let Some(p) = self.roster.get_mut(user_id) {
            p.touch(now);
        }
    }

    pub fn request_lock(
        &mut self,
        user_id: &str,
        block_id: &str,
        directory: &dyn AuthorizationDirectory,
        now: DateTime<Utc>,
    ) -> CollabResult<LockOutcome> {
        let participant = self.member(user_id)?;
        if !directory.has_capability(&participant.role, Capability::Edit) {
            return Err(CollabError::Unauthorized(format!(
                "role '{}' cannot lock blocks",
                participant.role
            )));
        }
        let requester = Requester::new(user_id, participant.rank);

        let outcome = self.locks.request_lock(block_id, &requester, now)?;
        self.touch(user_id, now);
        self.flush_lock_events();

        if let LockOutcome::Queued { position } = outcome {
            self.send_to(
                user_id,
                ServerEvent::LockQueued {
                    document_id: self.document_id.clone(),
                    block_id: block_id.to_string(),
                    position,
                },
            );
        }
        Ok(outcome)
    }

    /// False when `user_id` does not hold the block; that is contention, not an error
    pub fn release_lock(
        &mut self,
        user_id: &str,
        block_id: &str,
        now: DateTime<Utc>,
    ) -> CollabResult<bool> {
        self.member(user_id)?;
        let released = self.locks.release_lock(block_id, user_id, now)?;
        self.touch(user_id, now);
        self.flush_lock_events();
        Ok(released)
    }

    pub fn edit_block(
        &mut self,
        user_id: &str,
        block_id: &str,
        content: serde_json::Value,
        directory: &dyn AuthorizationDirectory,
        now: DateTime<Utc>,
    ) -> CollabResult<u64> {
        let role = self.member(user_id)?.role.clone();
        if !self.locks.contains_block(block_id) {
            return Err(CollabError::BlockNotFound(block_id.to_string()));
        }
        let holds_lock = self.locks.is_held_by(block_id, user_id);
        if !holds_lock {
            return Err(CollabError::Unauthorized(format!(
                "you do not hold the lock on block {}",
                block_id
            )));
        }
        if !self.workflow.can_edit(&role, holds_lock, directory) {
            return Err(CollabError::Unauthorized(format!(
                "role '{}' cannot edit while the document is {}",
                role,
                self.workflow.status()
            )));
        }

        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.id == block_id)
            .ok_or_else(|| CollabError::BlockNotFound(block_id.to_string()))?;
        block.content = content.clone();
        block.version += 1;
        block.last_modified_by = Some(user_id.to_string());
        block.last_modified_at = Some(now);
        let block_version = block.version;
        self.version += 1;

        self.locks.touch_activity(block_id, user_id, now)?;
        self.touch(user_id, now);

        self.broadcast(
            ServerEvent::BlockUpdated {
                document_id: self.document_id.clone(),
                block_id: block_id.to_string(),
                content,
                version: block_version,
                author: user_id.to_string(),
            },
            None,
        );
        Ok(block_version)
    }

    pub fn move_cursor(
        &mut self,
        user_id: &str,
        position: serde_json::Value,
        now: DateTime<Utc>,
    ) -> CollabResult<()> {
        self.member(user_id)?;
        if let Some(p) = self.roster.get_mut(user_id) {
            p.set_cursor(position.clone(), now);
        }
        self.broadcast(
            ServerEvent::CursorMoved {
                document_id: self.document_id.clone(),
                user_id: user_id.to_string(),
                position,
            },
            Some(user_id),
        );
        Ok(())
    }

    pub fn add_comment(
        &mut self,
        user_id: &str,
        text: String,
        position: Option<serde_json::Value>,
        directory: &dyn AuthorizationDirectory,
        now: DateTime<Utc>,
    ) -> CollabResult<Comment> {
        let participant = self.member(user_id)?;
        if !directory.has_capability(&participant.role, Capability::Comment) {
            return Err(CollabError::Unauthorized(format!(
                "role '{}' cannot comment",
                participant.role
            )));
        }

        let comment = Comment {
            id: self.comments.len() as u64 + 1,
            author: user_id.to_string(),
            author_name: participant.display_name.clone(),
            text,
            position,
            created_at: now,
        };
        self.comments.push(comment.clone());
        self.touch(user_id, now);

        self.broadcast(
            ServerEvent::CommentAdded {
                document_id: self.document_id.clone(),
                comment: comment.clone(),
            },
            None,
        );
        Ok(comment)
    }

    pub fn approve(
        &mut self,
        user_id: &str,
        action: ApprovalAction,
        directory: &dyn AuthorizationDirectory,
        now: DateTime<Utc>,
    ) -> CollabResult<Transition> {
        let role = self.member(user_id)?.role.clone();
        let transition = self.workflow.apply(action, &role, directory)?;
        self.touch(user_id, now);
        self.announce_transition(transition, user_id);
        Ok(transition)
    }

    /// Administrative freeze; `by` is recorded as the approver
    pub fn lock_document(&mut self, by: &str) -> CollabResult<Transition> {
        let transition = self.workflow.lock_document()?;
        self.announce_transition(transition, by);
        Ok(transition)
    }

    pub fn unlock_document(&mut self, by: &str) -> CollabResult<Transition> {
        let transition = self.workflow.unlock_document()?;
        self.announce_transition(transition, by);
        Ok(transition)
    }

    fn announce_transition(&self, transition: Transition, by: &str) {
        self.broadcast(
            ServerEvent::StatusChanged {
                document_id: self.document_id.clone(),
                old_status: transition.from,
                new_status: transition.to,
                approver: by.to_string(),
            },
            None,
        );
    }

    pub fn emergency_release(
        &mut self,
        block_id: &str,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> CollabResult<Option<String>> {
        let previous = self.locks.emergency_release(block_id, requester, now)?;
        self.flush_lock_events();
        Ok(previous)
    }

    /// Reclaim idle locks; the sweep has no caller, so problems are only logged
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, threshold: Duration) -> Vec<StaleLock> {
        let reclaimed = self.locks.sweep_stale(now, threshold);
        for stale in &reclaimed {
            if !self.roster.contains_key(&stale.holder) {
                tracing::warn!(
                    document_id = %self.document_id,
                    block_id = %stale.block_id,
                    holder = %stale.holder,
                    "Stale lock held by a participant missing from the roster"
                );
            }
        }
        self.flush_lock_events();
        reclaimed
    }

    /// Turn pending lock transitions into client events
    fn flush_lock_events(&mut self) {
        for event in self.locks.drain_events() {
            match event {
                LockEvent::Locked { block_id, holder } => {
                    self.broadcast(
                        ServerEvent::BlockLocked {
                            document_id: self.document_id.clone(),
                            block_id,
                            holder,
                        },
                        None,
                    );
                }
                LockEvent::Preempted {
                    block_id,
                    holder,
                    evicted,
                } => {
                    self.send_to(
                        &evicted,
                        ServerEvent::LockPreempted {
                            document_id: self.document_id.clone(),
                            block_id: block_id.clone(),
                            holder: holder.clone(),
                        },
                    );
                    self.broadcast(
                        ServerEvent::BlockLocked {
                            document_id: self.document_id.clone(),
                            block_id,
                            holder,
                        },
                        None,
                    );
                }
                LockEvent::Unlocked { block_id, .. } => {
                    self.broadcast(
                        ServerEvent::BlockUnlocked {
                            document_id: self.document_id.clone(),
                            block_id,
                        },
                        None,
                    );
                }
                LockEvent::Transferred {
                    block_id, holder, ..
                } => {
                    self.broadcast(
                        ServerEvent::BlockTransferred {
                            document_id: self.document_id.clone(),
                            block_id,
                            holder,
                        },
                        None,
                    );
                }
                LockEvent::StaleReleased {
                    block_id,
                    idle,
                    new_holder,
                    ..
                } => {
                    self.broadcast(
                        ServerEvent::StaleLockReleased {
                            document_id: self.document_id.clone(),
                            block_id,
                            idle_duration: idle.num_seconds(),
                            new_holder,
                        },
                        None,
                    );
                }
                LockEvent::EmergencyUnlocked { block_id, by, .. } => {
                    self.broadcast(
                        ServerEvent::EmergencyUnlock {
                            document_id: self.document_id.clone(),
                            block_id,
                            by,
                        },
                        None,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::RoleDirectory;
    use crate::collab::participant::Connection;
    use crate::models::DocumentKind;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn record() -> DocumentRecord {
        let now = Utc::now();
        DocumentRecord {
            id: "doc-1".to_string(),
            title: "Launch announcement".to_string(),
            kind: DocumentKind::PressRelease,
            status: WorkflowStatus::Draft,
            blocks: ["b1", "b2", "b3", "b4", "b5"]
                .iter()
                .map(|id| Block::new(*id, serde_json::Value::Null))
                .collect(),
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn session() -> DocumentSession {
        DocumentSession::from_record(record(), LockPolicy::default())
    }

    fn add(
        session: &mut DocumentSession,
        user_id: &str,
        role: &str,
        dir: &RoleDirectory,
    ) -> UnboundedReceiver<ServerEvent> {
        let (conn, rx) = Connection::channel();
        let rank = dir.rank(role).unwrap();
        session.join(Participant::new(user_id, user_id, role, rank, conn));
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(serde_json::from_str(&event.to_json()).unwrap());
        }
        out
    }

    fn types(events: &[serde_json::Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_join_sends_snapshot_and_notifies_others() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut alice = add(&mut s, "alice", "writer", &dir);
        let alice_events = drain(&mut alice);
        assert_eq!(types(&alice_events), vec!["document_state"]);
        assert_eq!(alice_events[0]["blocks"].as_array().unwrap().len(), 5);

        let mut bob = add(&mut s, "bob", "editor", &dir);
        assert_eq!(types(&drain(&mut bob)), vec!["document_state"]);
        let alice_events = drain(&mut alice);
        assert_eq!(types(&alice_events), vec!["user_joined"]);
        assert_eq!(alice_events[0]["roster"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_scenario_preemption() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut senior = add(&mut s, "senior", "senior_editor", &dir);
        let mut chief = add(&mut s, "chief", "editor_in_chief", &dir);
        let now = Utc::now();

        let out = s.request_lock("senior", "b1", &dir, now).unwrap();
        assert_eq!(out, LockOutcome::Granted);
        drain(&mut senior);
        drain(&mut chief);

        let out = s.request_lock("chief", "b1", &dir, now).unwrap();
        assert_eq!(out, LockOutcome::Granted);
        assert!(s.locks().is_held_by("b1", "chief"));

        let evicted = drain(&mut senior);
        assert_eq!(types(&evicted), vec!["lock_preempted", "block_locked"]);
        assert_eq!(evicted[1]["holder"], "chief");
        assert_eq!(types(&drain(&mut chief)), vec!["block_locked"]);
    }

    #[test]
    fn test_scenario_queue_then_transfer() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut a = add(&mut s, "a", "writer", &dir);
        let mut b = add(&mut s, "b", "writer", &dir);
        let now = Utc::now();

        s.request_lock("a", "b2", &dir, now).unwrap();
        let out = s.request_lock("b", "b2", &dir, now).unwrap();
        assert_eq!(out, LockOutcome::Queued { position: 1 });
        drain(&mut a);
        let b_events = drain(&mut b);
        assert_eq!(types(&b_events).last().unwrap(), "lock_queued");
        assert_eq!(b_events.last().unwrap()["position"], 1);

        assert!(s.release_lock("a", "b2", now).unwrap());
        assert!(s.locks().is_held_by("b2", "b"));
        assert!(s.locks().queue("b2").is_empty());
        let a_events = drain(&mut a);
        assert_eq!(types(&a_events), vec!["block_transferred"]);
        assert_eq!(a_events[0]["holder"], "b");
    }

    #[test]
    fn test_release_by_non_holder_is_false() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let _a = add(&mut s, "a", "writer", &dir);
        let _b = add(&mut s, "b", "writer", &dir);
        let now = Utc::now();

        s.request_lock("a", "b1", &dir, now).unwrap();
        assert!(!s.release_lock("b", "b1", now).unwrap());
        assert!(s.locks().is_held_by("b1", "a"));
    }

    #[test]
    fn test_viewer_cannot_lock() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let _v = add(&mut s, "v", "viewer", &dir);
        let err = s.request_lock("v", "b1", &dir, Utc::now()).unwrap_err();
        assert!(matches!(err, CollabError::Unauthorized(_)));
        assert_eq!(s.locks().locked_count(), 0);
    }

    #[test]
    fn test_non_member_rejected() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let err = s.request_lock("ghost", "b1", &dir, Utc::now()).unwrap_err();
        assert!(matches!(err, CollabError::NotFound(_)));
    }

    #[test]
    fn test_edit_requires_lock() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut a = add(&mut s, "a", "writer", &dir);
        let mut b = add(&mut s, "b", "writer", &dir);
        drain(&mut a);
        drain(&mut b);

        let err = s
            .edit_block("a", "b1", serde_json::json!("text"), &dir, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CollabError::Unauthorized(_)));
        assert_eq!(s.blocks()[0].content, serde_json::Value::Null);
        assert_eq!(s.version(), 0);
        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn test_edit_blocked_by_workflow_status() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut a = add(&mut s, "a", "writer", &dir);
        let _chief = add(&mut s, "chief", "editor_in_chief", &dir);
        let now = Utc::now();

        s.request_lock("a", "b1", &dir, now).unwrap();
        s.approve("chief", ApprovalAction::Approve, &dir, now)
            .unwrap();
        drain(&mut a);

        let err = s
            .edit_block("a", "b1", serde_json::json!("late change"), &dir, now)
            .unwrap_err();
        assert!(matches!(err, CollabError::Unauthorized(_)));
        assert_eq!(s.blocks()[0].version, 0);
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn test_edit_updates_block_and_broadcasts() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut a = add(&mut s, "a", "writer", &dir);
        let mut b = add(&mut s, "b", "writer", &dir);
        let now = Utc::now();

        s.request_lock("a", "b3", &dir, now).unwrap();
        drain(&mut a);
        drain(&mut b);

        let later = now + Duration::seconds(30);
        let version = s
            .edit_block("a", "b3", serde_json::json!({"text": "Hello"}), &dir, later)
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(s.version(), 1);
        let block = &s.blocks()[2];
        assert_eq!(block.last_modified_by.as_deref(), Some("a"));
        assert_eq!(s.locks().holder("b3").unwrap().last_activity, later);

        for rx in [&mut a, &mut b] {
            let events = drain(rx);
            assert_eq!(types(&events), vec!["block_updated"]);
            assert_eq!(events[0]["content"]["text"], "Hello");
            assert_eq!(events[0]["author"], "a");
        }
    }

    #[test]
    fn test_edit_unknown_block() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let _a = add(&mut s, "a", "writer", &dir);
        let err = s
            .edit_block("a", "nope", serde_json::Value::Null, &dir, Utc::now())
            .unwrap_err();
        assert_eq!(err, CollabError::BlockNotFound("nope".into()));
    }

    #[test]
    fn test_scenario_stale_sweep_transfers() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let _idle = add(&mut s, "idle", "writer", &dir);
        let mut waiting = add(&mut s, "waiting", "writer", &dir);
        let t0 = Utc::now();

        s.request_lock("idle", "b3", &dir, t0).unwrap();
        s.request_lock("waiting", "b3", &dir, t0).unwrap();
        drain(&mut waiting);

        let reclaimed = s.sweep_stale(t0 + Duration::seconds(400), Duration::seconds(300));
        assert_eq!(reclaimed.len(), 1);
        assert!(s.locks().is_held_by("b3", "waiting"));

        let events = drain(&mut waiting);
        assert_eq!(types(&events), vec!["stale_lock_released"]);
        assert_eq!(events[0]["idleDuration"], 400);
        assert_eq!(events[0]["newHolder"], "waiting");
    }

    #[test]
    fn test_sweep_reclaims_orphaned_lock() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let t0 = Utc::now();
        let _a = add(&mut s, "a", "writer", &dir);
        s.request_lock("a", "b1", &dir, t0).unwrap();
        // Remove from the roster without the leave cleanup.
        s.roster.remove("a");

        let reclaimed = s.sweep_stale(t0 + Duration::seconds(400), Duration::seconds(300));
        assert_eq!(reclaimed.len(), 1);
        assert!(s.locks().holder("b1").is_none());
    }

    #[test]
    fn test_scenario_leave_cleanup() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let _leaver = add(&mut s, "leaver", "writer", &dir);
        let mut next = add(&mut s, "next", "writer", &dir);
        let mut other = add(&mut s, "other", "writer", &dir);
        let now = Utc::now();

        s.request_lock("leaver", "b4", &dir, now).unwrap();
        s.request_lock("next", "b4", &dir, now).unwrap();
        s.request_lock("other", "b5", &dir, now).unwrap();
        s.request_lock("leaver", "b5", &dir, now).unwrap();
        drain(&mut next);
        drain(&mut other);

        let removed = s.leave("leaver", now);
        assert!(removed.is_some());
        assert!(s.locks().is_held_by("b4", "next"));
        assert!(s.locks().queue("b5").is_empty());
        assert_eq!(s.participant_count(), 2);

        let events = drain(&mut other);
        assert_eq!(types(&events), vec!["block_transferred", "user_left"]);
        assert_eq!(events[1]["roster"].as_array().unwrap().len(), 2);
        assert!(s.leave("leaver", now).is_none());
    }

    #[test]
    fn test_cursor_excludes_sender() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut a = add(&mut s, "a", "writer", &dir);
        let mut b = add(&mut s, "b", "writer", &dir);
        drain(&mut a);
        drain(&mut b);

        s.move_cursor("a", serde_json::json!({"blockId": "b1", "offset": 4}), Utc::now())
            .unwrap();
        assert!(drain(&mut a).is_empty());
        let events = drain(&mut b);
        assert_eq!(types(&events), vec!["cursor_moved"]);
        assert_eq!(events[0]["userId"], "a");
        assert!(s.participant("a").unwrap().cursor.is_some());
    }

    #[test]
    fn test_comments_are_numbered() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut a = add(&mut s, "a", "writer", &dir);
        let now = Utc::now();

        let c1 = s.add_comment("a", "first".into(), None, &dir, now).unwrap();
        let c2 = s
            .add_comment("a", "second".into(), Some(serde_json::json!(12)), &dir, now)
            .unwrap();
        assert_eq!((c1.id, c2.id), (1, 2));
        assert_eq!(s.comments().len(), 2);

        let events = drain(&mut a);
        assert_eq!(
            types(&events),
            vec!["document_state", "comment_added", "comment_added"]
        );
    }

    #[test]
    fn test_viewer_cannot_comment() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let _v = add(&mut s, "v", "viewer", &dir);
        let err = s
            .add_comment("v", "hi".into(), None, &dir, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CollabError::Unauthorized(_)));
        assert!(s.comments().is_empty());
    }

    #[test]
    fn test_approve_broadcasts_status_change() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut a = add(&mut s, "a", "writer", &dir);
        let _chief = add(&mut s, "chief", "editor_in_chief", &dir);
        drain(&mut a);

        let err = s
            .approve("a", ApprovalAction::Approve, &dir, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CollabError::Unauthorized(_)));

        s.approve("chief", ApprovalAction::RequestChanges, &dir, Utc::now())
            .unwrap();
        let events = drain(&mut a);
        assert_eq!(types(&events), vec!["status_changed"]);
        assert_eq!(events[0]["newStatus"], "revision_requested");
        assert_eq!(events[0]["approver"], "chief");
    }

    #[test]
    fn test_emergency_release_broadcast() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let mut a = add(&mut s, "a", "writer", &dir);
        let now = Utc::now();
        s.request_lock("a", "b1", &dir, now).unwrap();
        drain(&mut a);

        let previous = s
            .emergency_release("b1", &Requester::new("chief", 1), now)
            .unwrap();
        assert_eq!(previous.as_deref(), Some("a"));
        let events = drain(&mut a);
        assert_eq!(types(&events), vec!["emergency_unlock"]);
        assert_eq!(events[0]["by"], "chief");
    }

    #[test]
    fn test_broadcast_skips_dropped_connection() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let a = add(&mut s, "a", "writer", &dir);
        let mut b = add(&mut s, "b", "writer", &dir);
        drop(a);
        drain(&mut b);

        s.add_comment("b", "still here".into(), None, &dir, Utc::now())
            .unwrap();
        assert_eq!(types(&drain(&mut b)), vec!["comment_added"]);
    }

    #[test]
    fn test_info_counts() {
        let dir = RoleDirectory::newsroom_defaults();
        let mut s = session();
        let _a = add(&mut s, "a", "writer", &dir);
        let _b = add(&mut s, "b", "writer", &dir);
        let now = Utc::now();
        s.request_lock("a", "b1", &dir, now).unwrap();
        s.request_lock("b", "b1", &dir, now).unwrap();

        let info = s.info();
        assert_eq!(info.participants.len(), 2);
        assert_eq!(info.locks.len(), 1);
        assert_eq!(info.queued_requests, 1);
        assert_eq!(info.status, WorkflowStatus::Draft);
    }
}
