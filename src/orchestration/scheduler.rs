//! One-shot deferred actions ("check in after N minutes").
//!
//! The `Scheduler` keeps a pending list sorted by fire time. The
//! coordination loop drains due actions each tick and dispatches them;
//! a drained action is marked fired and pruned, so delivery is
//! at-most-once. There is no persistence: actions missed while the loop
//! is down are lost, not replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mlog_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A deferred instruction for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: ActionId,
    pub target_agent_id: String,
    pub fire_at: DateTime<Utc>,
    pub payload: String,
    pub fired: bool,
}

/// Owns [`ScheduledAction`] lifecycle: created on request, drained on
/// firing, gone afterwards. Shared as `Arc<RwLock<Scheduler>>`; the lock
/// also resolves the cancel-versus-fire race: a cancel either removes the
/// action before a tick drains it, or arrives late and reports `false`.
/// Never both.
#[derive(Debug, Default)]
pub struct Scheduler {
    /// Pending actions, sorted by `fire_at` (ties keep insertion order).
    pending: Vec<ScheduledAction>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot action to fire after `delay`.
    ///
    /// Fails with `InvalidDelay` unless the delay is strictly positive, so
    /// `fire_at` is always in the future at creation time.
    pub fn schedule_once(
        &mut self,
        target_agent_id: &str,
        delay: Duration,
        payload: &str,
    ) -> Result<ScheduledAction> {
        if delay.is_zero() {
            return Err(Error::InvalidDelay);
        }
        let delay = chrono::Duration::from_std(delay).map_err(|_| Error::InvalidDelay)?;
        let action = ScheduledAction {
            id: ActionId::new(),
            target_agent_id: target_agent_id.to_string(),
            fire_at: Utc::now() + delay,
            payload: payload.to_string(),
            fired: false,
        };
        mlog_debug!(
            "Scheduler::schedule_once id={} target={} fire_at={}",
            action.id.short(),
            target_agent_id,
            action.fire_at
        );

        let at = self
            .pending
            .partition_point(|a| a.fire_at <= action.fire_at);
        self.pending.insert(at, action.clone());
        Ok(action)
    }

    /// Cancel a pending action.
    ///
    /// Returns false when the id is unknown or the action already fired,
    /// an idempotent no-op rather than an error.
    pub fn cancel(&mut self, id: ActionId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|a| a.id != id);
        let cancelled = self.pending.len() != before;
        if cancelled {
            mlog_debug!("Scheduler::cancel id={}", id.short());
        }
        cancelled
    }

    /// Drain every action whose fire time has passed, marking each fired.
    ///
    /// Drained actions leave the pending list permanently; dispatch
    /// failures downstream are logged, not retried (at-most-once).
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledAction> {
        let split = self.pending.partition_point(|a| a.fire_at <= now);
        let mut due: Vec<ScheduledAction> = self.pending.drain(..split).collect();
        for action in &mut due {
            action.fired = true;
        }
        due
    }

    /// Snapshot of pending actions, soonest first.
    pub fn pending(&self) -> Vec<ScheduledAction> {
        self.pending.clone()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
