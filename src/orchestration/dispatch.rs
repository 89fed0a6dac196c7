//! Message dispatch to agent input streams.
//!
//! The `MessageDispatcher` delivers an instruction to the window an agent
//! lives in: registry lookup, time-bounded pre-flight validation against
//! the live multiplexer, then a send-keys call. A missing target gets
//! exactly one retry after a short delay (windows can be mid-creation);
//! the second failure surfaces as `TargetUnavailable` and marks the agent
//! Unresponsive.
//!
//! Ordering: sends to the *same* agent are serialized through a per-agent
//! lock and delivered in submission order; sends to different agents
//! proceed in parallel with no ordering between them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::{Error, Result};
use crate::registry::AgentRegistry;
use crate::tmux::Multiplexer;
use crate::util::blocking_with_timeout;
use crate::{mlog_debug, mlog_warn};

/// Default sender recorded on messages dispatched without an explicit one.
pub const OPERATOR_SENDER: &str = "operator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One instruction delivered to an agent.
///
/// `delivery_confirmed` means the text reached the window's input buffer
/// (the low-level send returned success). Whether the agent read and acted
/// on it is unverifiable without a response protocol, which is out of
/// scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub delivery_confirmed: bool,
}

/// Per-recipient result of a broadcast. One entry per target, always.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub recipient_id: String,
    pub result: Result<Message>,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Wait before the single retry when the target is missing.
    pub retry_delay: std::time::Duration,
    /// Deadline for each individual multiplexer call.
    pub call_timeout: std::time::Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_delay: std::time::Duration::from_millis(500),
            call_timeout: std::time::Duration::from_secs(5),
        }
    }
}

pub struct MessageDispatcher {
    registry: Arc<RwLock<AgentRegistry>>,
    mux: Arc<dyn Multiplexer>,
    config: DispatchConfig,
    /// Per-agent send locks; tokio mutexes are fair, so waiters drain in
    /// submission order.
    send_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MessageDispatcher {
    pub fn new(
        registry: Arc<RwLock<AgentRegistry>>,
        mux: Arc<dyn Multiplexer>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            mux,
            config,
            send_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Send `content` to the agent's window as the operator.
    pub async fn send(&self, recipient_id: &str, content: &str) -> Result<Message> {
        self.send_from(OPERATOR_SENDER, recipient_id, content).await
    }

    /// Send `content` to the agent's window on behalf of `sender_id`.
    pub async fn send_from(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
    ) -> Result<Message> {
        let agent = self.registry.read().await.get(recipient_id)?;

        let lock = self.agent_lock(recipient_id).await;
        let _guard = lock.lock().await;

        // Pre-flight: the agent's window must still resolve. One retry
        // absorbs the race where a window is mid-creation.
        if let Some(reason) = self.probe(&agent).await {
            mlog_debug!(
                "Dispatch pre-flight failed for {} ({}), retrying once",
                recipient_id,
                reason
            );
            tokio::time::sleep(self.config.retry_delay).await;
            if let Some(reason) = self.probe(&agent).await {
                self.registry.write().await.mark_unresponsive(recipient_id);
                mlog_warn!("Dispatch target unavailable: {} ({})", recipient_id, reason);
                return Err(Error::TargetUnavailable {
                    agent: recipient_id.to_string(),
                    reason,
                });
            }
        }

        let mux = Arc::clone(&self.mux);
        let session = agent.session.clone();
        let window = agent.window;
        let text = content.to_string();
        blocking_with_timeout(self.config.call_timeout, move || {
            mux.send_line(&session, window, &text)
        })
        .await?;

        let now = Utc::now();
        // The recipient may have been deregistered while the send was in
        // flight; the delivery still happened, so don't fail the call.
        if let Err(e) = self
            .registry
            .write()
            .await
            .note_message_sent(recipient_id, now)
        {
            mlog_debug!("note_message_sent for {} skipped: {}", recipient_id, e);
        }

        let message = Message {
            id: MessageId::new(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: content.to_string(),
            sent_at: now,
            delivery_confirmed: true,
        };
        mlog_debug!(
            "Dispatched message {} to {} ({} bytes)",
            message.id.short(),
            recipient_id,
            content.len()
        );
        Ok(message)
    }

    /// Send `content` to every recipient independently. One target's
    /// failure never aborts the others; the result always has one outcome
    /// per recipient.
    pub async fn broadcast(&self, recipient_ids: &[String], content: &str) -> Vec<DispatchOutcome> {
        let sends = recipient_ids.iter().map(|id| async move {
            DispatchOutcome {
                recipient_id: id.clone(),
                result: self.send(id, content).await,
            }
        });
        futures::future::join_all(sends).await
    }

    /// Check that the agent's target still resolves. Returns a reason
    /// string when it does not, distinguishing a missing session from a
    /// missing window; a timed-out probe counts as unavailable.
    async fn probe(&self, agent: &Agent) -> Option<String> {
        let mux = Arc::clone(&self.mux);
        let session = agent.session.clone();
        let window = agent.window;
        let result = blocking_with_timeout(self.config.call_timeout, move || {
            if !mux.session_exists(&session) {
                return Ok(Some(format!("session '{}' not found", session)));
            }
            if !mux.window_exists(&session, window) {
                return Ok(Some(format!("window {}:{} not found", session, window)));
            }
            Ok(None)
        })
        .await;

        match result {
            Ok(reason) => reason,
            Err(e) => Some(format!("probe failed: {}", e)),
        }
    }

    async fn agent_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.send_locks.lock().await;
        Arc::clone(
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
