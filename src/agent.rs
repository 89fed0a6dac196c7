//! Agent records and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role tag for a coordinated agent. Informational only; no component
/// dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    Orchestrator,
    ProjectManager,
    Engineer,
    Qa,
    Devops,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Orchestrator => write!(f, "orchestrator"),
            AgentRole::ProjectManager => write!(f, "project-manager"),
            AgentRole::Engineer => write!(f, "engineer"),
            AgentRole::Qa => write!(f, "qa"),
            AgentRole::Devops => write!(f, "devops"),
        }
    }
}

impl std::str::FromStr for AgentRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "orchestrator" => Ok(AgentRole::Orchestrator),
            "project-manager" | "pm" => Ok(AgentRole::ProjectManager),
            "engineer" => Ok(AgentRole::Engineer),
            "qa" => Ok(AgentRole::Qa),
            "devops" => Ok(AgentRole::Devops),
            other => Err(Error::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// Lifecycle status of an agent.
///
/// Valid transitions:
///
/// ```text
/// Starting     -> Active | Unresponsive | Stopped
/// Active       -> Idle | Unresponsive | Stopped
/// Idle         -> Active | Unresponsive | Stopped
/// Unresponsive -> Active | Error | Stopped
/// Error        -> Stopped
/// Stopped      -> (terminal)
/// ```
///
/// `Error` and `Stopped` are terminal for the record: recovery from `Error`
/// requires deregistering and registering a fresh agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Starting,
    Active,
    Idle,
    Unresponsive,
    Error,
    Stopped,
}

impl AgentStatus {
    /// Check whether moving to `target` is allowed by the transition table.
    /// Same-state is not a transition; callers treat it as a no-op.
    pub fn can_transition(&self, target: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (*self, target),
            (Starting, Active)
                | (Starting, Unresponsive)
                | (Active, Idle)
                | (Active, Unresponsive)
                | (Idle, Active)
                | (Idle, Unresponsive)
                | (Unresponsive, Active)
                | (Unresponsive, Error)
                | (Starting, Stopped)
                | (Active, Stopped)
                | (Idle, Stopped)
                | (Unresponsive, Stopped)
                | (Error, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Error | AgentStatus::Stopped)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Starting => write!(f, "starting"),
            AgentStatus::Active => write!(f, "active"),
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Unresponsive => write!(f, "unresponsive"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Location and registration details for a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub session: String,
    pub window: u32,
    pub role: AgentRole,
}

/// One coordinated worker process, located at `session:window`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub session: String,
    pub window: u32,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    /// Last confirmed liveness signal (successful existence check).
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_message_sent: Option<DateTime<Utc>>,
    pub last_message_ack: Option<DateTime<Utc>>,
    /// Consecutive failed health checks; reset on any success.
    pub consecutive_failures: u32,
    /// Fingerprint of the last captured pane output.
    pub last_output_fingerprint: Option<u64>,
    /// When the captured output last changed.
    pub output_changed_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn from_spec(spec: AgentSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            session: spec.session,
            window: spec.window,
            role: spec.role,
            status: AgentStatus::Starting,
            registered_at: now,
            last_heartbeat: None,
            last_message_sent: None,
            last_message_ack: None,
            consecutive_failures: 0,
            last_output_fingerprint: None,
            output_changed_at: None,
        }
    }

    /// Attempt a status transition, enforcing the table. Same-state updates
    /// are an idempotent no-op; illegal transitions fail and leave the
    /// record unchanged.
    pub fn transition(&mut self, target: AgentStatus) -> Result<()> {
        if self.status == target {
            return Ok(());
        }
        if !self.status.can_transition(target) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Pane address in tmux target syntax.
    pub fn target(&self) -> String {
        crate::tmux::target(&self.session, self.window)
    }
}
