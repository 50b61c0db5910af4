//! Session coordinator
//!
//! Owns the live session of every open document. Sessions are created on
//! first join by loading from the [`DocumentStore`], and destroyed when the
//! last participant leaves. Each session sits behind its own mutex; the
//! registry lock is never held while waiting on a session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::lock::{LockOutcome, LockPolicy, Requester};
use super::participant::{Connection, Participant};
use super::protocol::{ClientMessage, DocumentState, Envelope, ServerEvent};
use super::session::{DocumentSession, SessionInfo};
use super::workflow::Transition;
use crate::authz::{AuthorizationDirectory, Capability};
use crate::config::CoordinatorConfig;
use crate::error::{CollabError, CollabResult};
use crate::store::DocumentStore;

type SharedSession = Arc<Mutex<DocumentSession>>;

/// Totals across every open session
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub active_sessions: usize,
    pub participants: usize,
    pub locked_blocks: usize,
    pub queued_requests: usize,
    pub comments: usize,
    pub sessions_by_status: BTreeMap<String, usize>,
}

pub struct Coordinator {
    sessions: RwLock<HashMap<String, SharedSession>>,
    directory: Arc<dyn AuthorizationDirectory>,
    store: Arc<dyn DocumentStore>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        directory: Arc<dyn AuthorizationDirectory>,
        store: Arc<dyn DocumentStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            directory,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            preemption_gap: self.config.preemption_gap,
            emergency_ranks: self.config.emergency_ranks.clone(),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get the open session, loading the document if needed
    async fn get_or_load(&self, document_id: &str) -> CollabResult<SharedSession> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(document_id) {
                return Ok(session.clone());
            }
        }

        let record = self
            .store
            .load(document_id)
            .await
            .map_err(CollabError::from)?
            .ok_or_else(|| CollabError::NotFound(format!("Document {}", document_id)))?;

        let mut sessions = self.sessions.write().await;
        // Double-check after acquiring the write lock
        if let Some(session) = sessions.get(document_id) {
            return Ok(session.clone());
        }
        let session = Arc::new(Mutex::new(DocumentSession::from_record(
            record,
            self.lock_policy(),
        )));
        sessions.insert(document_id.to_string(), session.clone());
        tracing::info!(document_id, "Session created");
        Ok(session)
    }

    async fn existing(&self, document_id: &str) -> CollabResult<SharedSession> {
        self.sessions
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| CollabError::NotFound(format!("No open session for {}", document_id)))
    }

    /// Drop `session` from the registry unless it was already replaced
    async fn remove_session(&self, document_id: &str, session: &SharedSession) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(document_id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(document_id);
            tracing::info!(document_id, "Session destroyed");
        }
    }

    pub async fn join(
        &self,
        document_id: &str,
        user_id: &str,
        role: &str,
        display_name: &str,
        connection: Connection,
    ) -> CollabResult<DocumentState> {
        let rank = self
            .directory
            .rank(role)
            .ok_or_else(|| CollabError::Unauthorized(format!("unknown role '{}'", role)))?;
        if !self.directory.has_capability(role, Capability::Read) {
            return Err(CollabError::Unauthorized(format!(
                "role '{}' cannot read documents",
                role
            )));
        }

        loop {
            let session = self.get_or_load(document_id).await?;
            let mut guard = session.lock().await;
            if guard.is_closed() {
                // Lost a race with the last leave; start over on a fresh session
                drop(guard);
                self.remove_session(document_id, &session).await;
                continue;
            }

            let participant =
                Participant::new(user_id, display_name, role, rank, connection.clone());
            return Ok(guard.join(participant));
        }
    }

    /// Route one inbound envelope. Errors are meant for the sender only.
    pub async fn dispatch(&self, envelope: &Envelope, connection: &Connection) -> CollabResult<()> {
        let message = envelope.message()?;
        let document_id = envelope.document_id.as_str();
        let user_id = envelope.sender_id.as_str();

        if let ClientMessage::Join { role, display_name } = &message {
            self.join(document_id, user_id, role, display_name, connection.clone())
                .await?;
            return Ok(());
        }

        let session = self.existing(document_id).await?;
        let mut guard = session.lock().await;
        if guard.is_closed() {
            return Err(CollabError::NotFound(format!(
                "No open session for {}",
                document_id
            )));
        }
        if let Some(p) = guard.participant(user_id) {
            if p.connection.id() != connection.id() {
                return Err(CollabError::Unauthorized(format!(
                    "{} is joined from another connection",
                    user_id
                )));
            }
        }

        let now = Utc::now();
        let directory = self.directory.as_ref();
        match message {
            ClientMessage::Join { .. } => {}
            ClientMessage::RequestBlockLock { block_id } => {
                let outcome = guard.request_lock(user_id, &block_id, directory, now)?;
                if let LockOutcome::Queued { position } = outcome {
                    tracing::debug!(document_id, user_id, block_id = %block_id, position, "Lock request queued");
                }
            }
            ClientMessage::ReleaseBlockLock { block_id } => {
                if !guard.release_lock(user_id, &block_id, now)? {
                    tracing::debug!(document_id, user_id, block_id = %block_id, "Release ignored, not the holder");
                }
            }
            ClientMessage::EditBlock { block_id, content } => {
                guard.edit_block(user_id, &block_id, content, directory, now)?;
            }
            ClientMessage::Cursor { position } => {
                guard.move_cursor(user_id, position, now)?;
            }
            ClientMessage::Comment { text, position } => {
                guard.add_comment(user_id, text, position, directory, now)?;
            }
            ClientMessage::Approve { action } => {
                guard.approve(user_id, action, directory, now)?;
            }
        }
        Ok(())
    }

    pub async fn broadcast(
        &self,
        document_id: &str,
        event: ServerEvent,
        excluding: Option<&str>,
    ) -> CollabResult<()> {
        let session = self.existing(document_id).await?;
        let guard = session.lock().await;
        guard.broadcast(event, excluding);
        Ok(())
    }

    /// Returns false if `user_id` was not in the session
    pub async fn leave(&self, document_id: &str, user_id: &str) -> CollabResult<bool> {
        self.remove_participant(document_id, user_id, None, None)
            .await
    }

    /// Transport-close path; ignored when the roster entry belongs to a newer connection
    pub async fn disconnect(
        &self,
        document_id: &str,
        user_id: &str,
        connection_id: Uuid,
    ) -> CollabResult<bool> {
        self.remove_participant(document_id, user_id, Some(connection_id), None)
            .await
    }

    pub async fn force_disconnect(
        &self,
        document_id: &str,
        user_id: &str,
        reason: &str,
    ) -> CollabResult<()> {
        let removed = self
            .remove_participant(document_id, user_id, None, Some(reason))
            .await?;
        if !removed {
            return Err(CollabError::NotFound(format!(
                "{} is not in document {}",
                user_id, document_id
            )));
        }
        tracing::info!(document_id, user_id, reason, "Participant force-disconnected");
        Ok(())
    }

    async fn remove_participant(
        &self,
        document_id: &str,
        user_id: &str,
        connection_id: Option<Uuid>,
        notice: Option<&str>,
    ) -> CollabResult<bool> {
        let session = self.existing(document_id).await?;
        let mut guard = session.lock().await;

        let Some(participant) = guard.participant(user_id) else {
            return Ok(false);
        };
        if connection_id.is_some_and(|id| participant.connection.id() != id) {
            return Ok(false);
        }

        if let Some(reason) = notice {
            guard.send_to(
                user_id,
                ServerEvent::Disconnected {
                    document_id: document_id.to_string(),
                    reason: reason.to_string(),
                },
            );
        }
        guard.leave(user_id, Utc::now());

        let empty = guard.is_empty();
        if empty {
            guard.mark_closed();
        }
        drop(guard);

        if empty {
            self.remove_session(document_id, &session).await;
        }
        Ok(true)
    }

    fn snapshot_sessions(sessions: &HashMap<String, SharedSession>) -> Vec<SharedSession> {
        sessions.values().cloned().collect()
    }

    /// Reclaim idle locks in every session; returns how many were reclaimed
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let sessions = Self::snapshot_sessions(&*self.sessions.read().await);

        let mut reclaimed = 0;
        for session in sessions {
            let mut guard = session.lock().await;
            if guard.is_closed() {
                continue;
            }
            reclaimed += guard.sweep_stale(now, self.config.stale_threshold).len();
        }
        reclaimed
    }

    pub fn spawn_stale_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let reclaimed = self.sweep_stale(Utc::now()).await;
                if reclaimed > 0 {
                    tracing::info!(reclaimed, "Stale locks reclaimed");
                }
            }
        })
    }

    /// Persist the current blocks and status
    pub async fn save(&self, document_id: &str, user_id: &str) -> CollabResult<()> {
        let session = self.existing(document_id).await?;
        let persist = session.lock().await.persist_lock();
        let _persisting = persist.lock().await;
        let (blocks, status) = {
            let guard = session.lock().await;
            if guard.participant(user_id).is_none() {
                return Err(CollabError::NotFound(format!(
                    "{} has not joined document {}",
                    user_id, document_id
                )));
            }
            (guard.blocks().to_vec(), guard.status())
        };

        self.store
            .save(document_id, &blocks, status)
            .await
            .map_err(CollabError::from)?;
        tracing::info!(document_id, user_id, "Document saved");
        Ok(())
    }

    pub async fn publish(&self, document_id: &str, user_id: &str) -> CollabResult<DateTime<Utc>> {
        let session = self.existing(document_id).await?;
        let persist = session.lock().await.persist_lock();
        let _persisting = persist.lock().await;
        let (blocks, status) = {
            let guard = session.lock().await;
            let participant = guard.participant(user_id).ok_or_else(|| {
                CollabError::NotFound(format!(
                    "{} has not joined document {}",
                    user_id, document_id
                ))
            })?;
            if !self
                .directory
                .has_capability(&participant.role, Capability::Approve)
            {
                return Err(CollabError::Unauthorized(format!(
                    "role '{}' cannot publish",
                    participant.role
                )));
            }
            let status = guard.status();
            if status != crate::models::WorkflowStatus::Approved {
                return Err(CollabError::Unauthorized(format!(
                    "cannot publish while the document is {}",
                    status
                )));
            }
            (guard.blocks().to_vec(), status)
        };

        let published_at = Utc::now();
        self.store
            .save(document_id, &blocks, status)
            .await
            .map_err(CollabError::from)?;
        self.store
            .mark_published(document_id, published_at)
            .await
            .map_err(CollabError::from)?;
        tracing::info!(document_id, user_id, "Document published");
        Ok(published_at)
    }

    pub async fn session_info(&self, document_id: &str) -> CollabResult<SessionInfo> {
        let session = self.existing(document_id).await?;
        let guard = session.lock().await;
        Ok(guard.info())
    }

    pub async fn aggregate_statistics(&self) -> Statistics {
        let sessions = Self::snapshot_sessions(&*self.sessions.read().await);

        let mut stats = Statistics::default();
        for session in sessions {
            let guard = session.lock().await;
            if guard.is_closed() {
                continue;
            }
            stats.active_sessions += 1;
            stats.participants += guard.participant_count();
            stats.locked_blocks += guard.locks().locked_count();
            stats.queued_requests += guard.locks().queued_count();
            stats.comments += guard.comments().len();
            *stats
                .sessions_by_status
                .entry(guard.status().as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    pub async fn lock_document(&self, document_id: &str, by: &str) -> CollabResult<Transition> {
        let session = self.existing(document_id).await?;
        let mut guard = session.lock().await;
        guard.lock_document(by)
    }

    pub async fn unlock_document(&self, document_id: &str, by: &str) -> CollabResult<Transition> {
        let session = self.existing(document_id).await?;
        let mut guard = session.lock().await;
        guard.unlock_document(by)
    }

    /// Force-clear a block; the caller's role must map to an emergency rank
    pub async fn emergency_release(
        &self,
        document_id: &str,
        block_id: &str,
        user_id: &str,
        role: &str,
    ) -> CollabResult<Option<String>> {
        let rank = self
            .directory
            .rank(role)
            .ok_or_else(|| CollabError::Unauthorized(format!("unknown role '{}'", role)))?;
        let requester = Requester::new(user_id, rank);

        let session = self.existing(document_id).await?;
        let mut guard = session.lock().await;
        guard.emergency_release(block_id, &requester, Utc::now())
    }
}
