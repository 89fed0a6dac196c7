//! Health monitoring for registered agents.
//!
//! The `HealthMonitor` polls the multiplexer for every non-Stopped agent:
//! existence of the agent's session and window, then a tail capture of its
//! pane output. Results become status transitions through the registry's
//! transition table:
//!
//! - a missing target is a failed check: the first failure moves the agent
//!   to `Unresponsive`, and reaching the configured consecutive-failure
//!   threshold moves it on to `Error` (terminal; re-registration required);
//! - a present target is a heartbeat: `Starting` promotes to `Active`,
//!   `Unresponsive` recovers to `Active`, and the failure streak resets;
//! - unchanged output past the idle threshold moves `Active` to `Idle`;
//!   any output change moves `Idle` back to `Active`.
//!
//! Every multiplexer call is bounded by the per-check timeout; a timed-out
//! call counts as a failed check for that cycle. One slow or broken agent
//! never prevents the rest from being checked.

use std::sync::Arc;

use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::agent::{Agent, AgentStatus};
use crate::config::Config;
use crate::error::Result;
use crate::registry::AgentRegistry;
use crate::tmux::Multiplexer;
use crate::util::{blocking_with_timeout, fingerprint};
use crate::{mlog_debug, mlog_warn};

/// Default time without output change before an Active agent is Idle.
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 300; // 5 minutes

/// Default consecutive failed checks before Unresponsive becomes Error.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default deadline for a single agent's check.
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 5;

/// Default pane lines captured per check.
pub const DEFAULT_CAPTURE_LINES: u16 = 50;

/// Configuration for health monitoring.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time without output change before an Active agent is considered Idle.
    pub idle_threshold: Duration,
    /// Consecutive failed checks before an Unresponsive agent becomes Error.
    pub failure_threshold: u32,
    /// Deadline for each individual agent check.
    pub check_timeout: Duration,
    /// Pane lines captured per check.
    pub capture_lines: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(DEFAULT_IDLE_THRESHOLD_SECS),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            check_timeout: Duration::from_secs(DEFAULT_CHECK_TIMEOUT_SECS),
            capture_lines: DEFAULT_CAPTURE_LINES,
        }
    }
}

impl HealthConfig {
    /// Create a health config with the specified idle threshold.
    pub fn with_idle_threshold(threshold: Duration) -> Self {
        Self {
            idle_threshold: threshold,
            ..Default::default()
        }
    }

    /// Create a health config with the specified failure threshold.
    pub fn with_failure_threshold(failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_threshold: config.idle_threshold(),
            failure_threshold: config.failure_threshold,
            check_timeout: config.check_timeout(),
            capture_lines: config.capture_lines,
        }
    }
}

/// Events emitted by the health monitor.
///
/// These inform observers (the coordination loop, a status command) about
/// status transitions without them polling the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// An agent's output went quiet past the idle threshold.
    BecameIdle {
        agent_id: String,
    },
    /// An agent produced output again, or passed its first check.
    BecameActive {
        agent_id: String,
    },
    /// An agent's target failed to resolve on this check.
    Unresponsive {
        agent_id: String,
        /// Consecutive failed checks so far.
        failures: u32,
    },
    /// An agent reached the consecutive-failure threshold. Terminal.
    Errored {
        agent_id: String,
        failures: u32,
    },
    /// A previously unresponsive agent's target resolved again.
    Recovered {
        agent_id: String,
    },
}

impl HealthEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            HealthEvent::BecameIdle { agent_id }
            | HealthEvent::BecameActive { agent_id }
            | HealthEvent::Unresponsive { agent_id, .. }
            | HealthEvent::Errored { agent_id, .. }
            | HealthEvent::Recovered { agent_id } => agent_id,
        }
    }
}

/// Health monitor for agents.
///
/// Owns no agent state; reads snapshots from the registry and writes back
/// status transitions. Constructed with the shared registry and the
/// multiplexer, emits [`HealthEvent`]s over a channel (best-effort).
pub struct HealthMonitor {
    config: HealthConfig,
    registry: Arc<RwLock<AgentRegistry>>,
    mux: Arc<dyn Multiplexer>,
    event_tx: mpsc::Sender<HealthEvent>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        registry: Arc<RwLock<AgentRegistry>>,
        mux: Arc<dyn Multiplexer>,
        event_tx: mpsc::Sender<HealthEvent>,
    ) -> Self {
        Self {
            config,
            registry,
            mux,
            event_tx,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Run one health pass over every registered agent that is not Stopped.
    ///
    /// Checks are strictly ordered per agent (this method is only invoked
    /// from the coordination loop, never re-entrantly) and each one is
    /// independently time-bounded, so one hung agent cannot starve the
    /// rest. Per-agent errors become status transitions, not escaping
    /// errors.
    pub async fn check_all(&self) -> Vec<HealthEvent> {
        let agents: Vec<Agent> = self
            .registry
            .read()
            .await
            .list()
            .into_iter()
            .filter(|a| a.status != AgentStatus::Stopped)
            .collect();

        let mut events = Vec::new();
        for agent in agents {
            match self.check_agent(&agent).await {
                Ok(agent_events) => {
                    for event in agent_events {
                        let _ = self.event_tx.send(event.clone()).await;
                        events.push(event);
                    }
                }
                Err(e) => {
                    // Agent may have been deregistered mid-pass; nothing to
                    // transition.
                    mlog_warn!("Health check skipped for {}: {}", agent.id, e);
                }
            }
        }
        events
    }

    /// Check a single agent and apply the resulting transitions.
    ///
    /// `agent` is the snapshot taken at the start of the pass; the registry
    /// is re-locked only to apply results.
    pub async fn check_agent(&self, agent: &Agent) -> Result<Vec<HealthEvent>> {
        if agent.status.is_terminal() {
            return Ok(Vec::new());
        }

        match self.observe(agent).await {
            Some(output) => self.apply_success(agent, &output).await,
            None => self.apply_failure(agent).await,
        }
    }

    /// Resolve the agent's target and capture its output tail, bounded by
    /// the check timeout. `None` means the check failed: missing session or
    /// window, a capture error, or a timeout.
    async fn observe(&self, agent: &Agent) -> Option<String> {
        let mux = Arc::clone(&self.mux);
        let session = agent.session.clone();
        let window = agent.window;
        let lines = self.config.capture_lines;

        let result = blocking_with_timeout(self.config.check_timeout, move || {
            if !mux.session_exists(&session) || !mux.window_exists(&session, window) {
                return Ok(None);
            }
            Ok(Some(mux.capture_tail(&session, window, lines)?))
        })
        .await;

        match result {
            Ok(output) => output,
            Err(e) => {
                mlog_debug!("Health observe failed for {}: {}", agent.id, e);
                None
            }
        }
    }

    async fn apply_failure(&self, agent: &Agent) -> Result<Vec<HealthEvent>> {
        let mut registry = self.registry.write().await;
        let failures = registry.record_failure(&agent.id)?;
        let mut events = Vec::new();

        match agent.status {
            AgentStatus::Starting | AgentStatus::Active | AgentStatus::Idle => {
                registry.update_status(&agent.id, AgentStatus::Unresponsive)?;
                events.push(HealthEvent::Unresponsive {
                    agent_id: agent.id.clone(),
                    failures,
                });
            }
            AgentStatus::Unresponsive => {
                if failures >= self.config.failure_threshold {
                    registry.update_status(&agent.id, AgentStatus::Error)?;
                    events.push(HealthEvent::Errored {
                        agent_id: agent.id.clone(),
                        failures,
                    });
                } else {
                    events.push(HealthEvent::Unresponsive {
                        agent_id: agent.id.clone(),
                        failures,
                    });
                }
            }
            AgentStatus::Error | AgentStatus::Stopped => {}
        }
        Ok(events)
    }

    async fn apply_success(&self, agent: &Agent, output: &str) -> Result<Vec<HealthEvent>> {
        let now = Utc::now();
        let mut registry = self.registry.write().await;
        let changed = registry.note_output(&agent.id, fingerprint(output), now)?;
        registry.record_heartbeat(&agent.id, now)?;

        let mut events = Vec::new();
        match agent.status {
            AgentStatus::Starting => {
                registry.update_status(&agent.id, AgentStatus::Active)?;
                events.push(HealthEvent::BecameActive {
                    agent_id: agent.id.clone(),
                });
            }
            AgentStatus::Unresponsive => {
                registry.update_status(&agent.id, AgentStatus::Active)?;
                events.push(HealthEvent::Recovered {
                    agent_id: agent.id.clone(),
                });
            }
            AgentStatus::Active => {
                if !changed {
                    let quiet_for = agent
                        .output_changed_at
                        .map(|at| now.signed_duration_since(at))
                        .and_then(|d| d.to_std().ok())
                        .unwrap_or(Duration::ZERO);
                    if quiet_for >= self.config.idle_threshold {
                        registry.update_status(&agent.id, AgentStatus::Idle)?;
                        events.push(HealthEvent::BecameIdle {
                            agent_id: agent.id.clone(),
                        });
                    }
                }
            }
            AgentStatus::Idle => {
                if changed {
                    registry.update_status(&agent.id, AgentStatus::Active)?;
                    events.push(HealthEvent::BecameActive {
                        agent_id: agent.id.clone(),
                    });
                }
            }
            AgentStatus::Error | AgentStatus::Stopped => {}
        }
        Ok(events)
    }
}
