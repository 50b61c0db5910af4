//! Per-block locks with rank-ordered wait queues
//!
//! A block has at most one holder. Requests against a held block either
//! preempt (when the requester is senior enough) or join a queue ordered by
//! rank, then arrival. Nothing here blocks or awaits: every call returns an
//! outcome immediately and records what happened as a [`LockEvent`], which
//! the owning session drains under the same guard that made the change.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{CollabError, CollabResult};

/// Who is asking for a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub rank: u32,
}

impl Requester {
    pub fn new(user_id: impl Into<String>, rank: u32) -> Self {
        Self {
            user_id: user_id.into(),
            rank,
        }
    }
}

/// Current holder of a block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHolder {
    pub user_id: String,
    pub rank: u32,
    pub acquired_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// A pending request for a held block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub user_id: String,
    pub rank: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Result of a lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    /// 1-based position in the block's queue
    Queued { position: usize },
}

/// State transitions produced by the lock table
#[derive(Debug, Clone, PartialEq)]
pub enum LockEvent {
    /// Unlocked block granted on request
    Locked { block_id: String, holder: String },
    /// A senior requester took the block from its holder
    Preempted {
        block_id: String,
        holder: String,
        evicted: String,
    },
    /// Released with an empty queue
    Unlocked { block_id: String, previous: String },
    /// Released and handed to the head of the queue
    Transferred {
        block_id: String,
        holder: String,
        previous: Option<String>,
    },
    /// Reclaimed by the sweep after sitting idle
    StaleReleased {
        block_id: String,
        previous: String,
        idle: Duration,
        new_holder: Option<String>,
    },
    /// Cleared by a top-ranked user regardless of the holder
    EmergencyUnlocked {
        block_id: String,
        previous: Option<String>,
        by: String,
    },
}

/// Lock reclaimed by [`LockTable::sweep_stale`]
#[derive(Debug, Clone, PartialEq)]
pub struct StaleLock {
    pub block_id: String,
    pub holder: String,
    pub idle: Duration,
}

/// Holder and queue of one block, as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockLockSnapshot {
    pub block_id: String,
    pub holder: Option<LockHolder>,
    pub queue: Vec<QueueEntry>,
}

/// Tunables for preemption and emergency release
#[derive(Debug, Clone)]
pub struct LockPolicy {
    /// A requester preempts when `requester.rank <= holder.rank - preemption_gap`
    pub preemption_gap: u32,
    /// Ranks allowed to call [`LockTable::emergency_release`]
    pub emergency_ranks: Vec<u32>,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            preemption_gap: 2,
            emergency_ranks: vec![1, 2],
        }
    }
}

#[derive(Debug, Default)]
struct BlockLock {
    holder: Option<LockHolder>,
    queue: Vec<QueueEntry>,
}

/// Lock state for every block of one document
#[derive(Debug)]
pub struct LockTable {
    blocks: BTreeMap<String, BlockLock>,
    policy: LockPolicy,
    events: Vec<LockEvent>,
}

impl LockTable {
    pub fn new<I, S>(policy: LockPolicy, block_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocks: block_ids
                .into_iter()
                .map(|id| (id.into(), BlockLock::default()))
                .collect(),
            policy,
            events: Vec::new(),
        }
    }

    pub fn contains_block(&self, block_id: &str) -> bool {
        self.blocks.contains_key(block_id)
    }

    fn block_mut(&mut self, block_id: &str) -> CollabResult<&mut BlockLock> {
        self.blocks
            .get_mut(block_id)
            .ok_or_else(|| CollabError::BlockNotFound(block_id.to_string()))
    }

    /// Ask for the lock on a block. Never waits.
    pub fn request_lock(
        &mut self,
        block_id: &str,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> CollabResult<LockOutcome> {
        let gap = self.policy.preemption_gap;
        let block = self.block_mut(block_id)?;

        let Some(holder) = block.holder.as_ref() else {
            block.holder = Some(new_holder(&requester.user_id, requester.rank, now));
            tracing::debug!(block_id, holder = %requester.user_id, "Lock granted");
            self.events.push(LockEvent::Locked {
                block_id: block_id.to_string(),
                holder: requester.user_id.clone(),
            });
            return Ok(LockOutcome::Granted);
        };

        if holder.user_id == requester.user_id {
            return Ok(LockOutcome::Granted);
        }

        if preempts(requester.rank, holder.rank, gap) {
            let evicted = holder.user_id.clone();
            block.queue.retain(|e| e.user_id != requester.user_id);
            block.holder = Some(new_holder(&requester.user_id, requester.rank, now));
            tracing::debug!(
                block_id,
                holder = %requester.user_id,
                evicted = %evicted,
                "Lock preempted"
            );
            self.events.push(LockEvent::Preempted {
                block_id: block_id.to_string(),
                holder: requester.user_id.clone(),
                evicted,
            });
            return Ok(LockOutcome::Granted);
        }

        if let Some(idx) = block
            .queue
            .iter()
            .position(|e| e.user_id == requester.user_id)
        {
            return Ok(LockOutcome::Queued { position: idx + 1 });
        }

        // Entries of equal rank keep arrival order, so insert after them.
        let idx = block
            .queue
            .iter()
            .position(|e| e.rank > requester.rank)
            .unwrap_or(block.queue.len());
        block.queue.insert(
            idx,
            QueueEntry {
                user_id: requester.user_id.clone(),
                rank: requester.rank,
                enqueued_at: now,
            },
        );
        tracing::debug!(block_id, user = %requester.user_id, position = idx + 1, "Lock queued");

        Ok(LockOutcome::Queued { position: idx + 1 })
    }

    /// Give up a lock. Returns false if `user_id` is not the holder.
    pub fn release_lock(
        &mut self,
        block_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> CollabResult<bool> {
        let block = self.block_mut(block_id)?;
        match &block.holder {
            Some(holder) if holder.user_id == user_id => {}
            _ => return Ok(false),
        }

        let event = match hand_off(block, now) {
            Some(next) => LockEvent::Transferred {
                block_id: block_id.to_string(),
                holder: next,
                previous: Some(user_id.to_string()),
            },
            None => LockEvent::Unlocked {
                block_id: block_id.to_string(),
                previous: user_id.to_string(),
            },
        };
        tracing::debug!(block_id, user = user_id, "Lock released");
        self.events.push(event);
        Ok(true)
    }

    /// Refresh the holder's activity time; ignored for anyone else
    pub fn touch_activity(
        &mut self,
        block_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> CollabResult<()> {
        let block = self.block_mut(block_id)?;
        if let Some(holder) = block.holder.as_mut() {
            if holder.user_id == user_id {
                holder.last_activity = now;
            }
        }
        Ok(())
    }

    /// Reclaim every lock idle for longer than `threshold`
    pub fn sweep_stale(&mut self, now: DateTime<Utc>, threshold: Duration) -> Vec<StaleLock> {
        let mut reclaimed = Vec::new();

        for (block_id, block) in self.blocks.iter_mut() {
            let Some(holder) = block.holder.as_ref() else {
                continue;
            };
            let idle = now.signed_duration_since(holder.last_activity);
            if idle <= threshold {
                continue;
            }

            let previous = holder.user_id.clone();
            let new_holder = hand_off(block, now);
            tracing::debug!(
                block_id = %block_id,
                previous = %previous,
                idle_secs = idle.num_seconds(),
                "Stale lock reclaimed"
            );
            self.events.push(LockEvent::StaleReleased {
                block_id: block_id.clone(),
                previous: previous.clone(),
                idle,
                new_holder,
            });
            reclaimed.push(StaleLock {
                block_id: block_id.clone(),
                holder: previous,
                idle,
            });
        }

        reclaimed
    }

    /// Force-clear a block. The wait queue is kept and its head is granted
    /// straight away, so the emergency only removes the current holder.
    pub fn emergency_release(
        &mut self,
        block_id: &str,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> CollabResult<Option<String>> {
        if !self.policy.emergency_ranks.contains(&requester.rank) {
            return Err(CollabError::Unauthorized(format!(
                "rank {} may not force-unlock blocks",
                requester.rank
            )));
        }

        let block = self.block_mut(block_id)?;
        let previous = block.holder.take().map(|h| h.user_id);
        let next = hand_off(block, now);

        tracing::info!(
            block_id,
            by = %requester.user_id,
            previous = previous.as_deref().unwrap_or("-"),
            "Emergency unlock"
        );
        self.events.push(LockEvent::EmergencyUnlocked {
            block_id: block_id.to_string(),
            previous: previous.clone(),
            by: requester.user_id.clone(),
        });
        if let Some(holder) = next {
            self.events.push(LockEvent::Transferred {
                block_id: block_id.to_string(),
                holder,
                previous: previous.clone(),
            });
        }

        Ok(previous)
    }

    /// Drop every lock and queue entry belonging to `user_id`.
    ///
    /// Returns the number of locks that were released.
    pub fn release_all_held_by(&mut self, user_id: &str, now: DateTime<Utc>) -> usize {
        for block in self.blocks.values_mut() {
            block.queue.retain(|e| e.user_id != user_id);
        }

        let held: Vec<String> = self
            .blocks
            .iter()
            .filter(|(_, b)| b.holder.as_ref().is_some_and(|h| h.user_id == user_id))
            .map(|(id, _)| id.clone())
            .collect();

        for block_id in &held {
            if let Err(e) = self.release_lock(block_id, user_id, now) {
                tracing::warn!("Release during cleanup failed: {}", e);
            }
        }

        held.len()
    }

    pub fn holder(&self, block_id: &str) -> Option<&LockHolder> {
        self.blocks.get(block_id).and_then(|b| b.holder.as_ref())
    }

    pub fn is_held_by(&self, block_id: &str, user_id: &str) -> bool {
        self.holder(block_id).is_some_and(|h| h.user_id == user_id)
    }

    pub fn queue(&self, block_id: &str) -> &[QueueEntry] {
        self.blocks
            .get(block_id)
            .map(|b| b.queue.as_slice())
            .unwrap_or(&[])
    }

    /// Blocks that are currently held, with their queues
    pub fn snapshot(&self) -> Vec<BlockLockSnapshot> {
        self.blocks
            .iter()
            .filter(|(_, b)| b.holder.is_some())
            .map(|(id, b)| BlockLockSnapshot {
                block_id: id.clone(),
                holder: b.holder.clone(),
                queue: b.queue.clone(),
            })
            .collect()
    }

    pub fn locked_count(&self) -> usize {
        self.blocks.values().filter(|b| b.holder.is_some()).count()
    }

    pub fn queued_count(&self) -> usize {
        self.blocks.values().map(|b| b.queue.len()).sum()
    }

    /// Take the events recorded since the last drain, oldest first
    pub fn drain_events(&mut self) -> Vec<LockEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Lower rank is more senior; the gap must fit under the holder's rank.
fn preempts(requester_rank: u32, holder_rank: u32, gap: u32) -> bool {
    holder_rank
        .checked_sub(gap)
        .is_some_and(|threshold| requester_rank <= threshold)
}

fn new_holder(user_id: &str, rank: u32, now: DateTime<Utc>) -> LockHolder {
    LockHolder {
        user_id: user_id.to_string(),
        rank,
        acquired_at: now,
        last_activity: now,
    }
}

/// Pass the block to the head of its queue, or clear it
fn hand_off(block: &mut BlockLock, now: DateTime<Utc>) -> Option<String> {
    if block.queue.is_empty() {
        block.holder = None;
        return None;
    }
    let next = block.queue.remove(0);
    block.holder = Some(new_holder(&next.user_id, next.rank, now));
    Some(next.user_id)
}
