//! The agent registry: the single shared mutable structure in the system.
//!
//! The registry owns agent lifecycle: records are created by `register`,
//! removed by `deregister`, and every status change goes through the
//! transition table in [`crate::agent::AgentStatus`]. It is shared as
//! `Arc<RwLock<AgentRegistry>>` and handed to each component at
//! construction time; nothing reaches it ambiently. Reads hand out cloned
//! snapshots, never live views.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::agent::{Agent, AgentSpec, AgentStatus};
use crate::error::{Error, Result};
use crate::mlog_debug;

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent with initial status `Starting`.
    ///
    /// Fails with `DuplicateAgent` if the id is already present; the
    /// existing record is left untouched.
    pub fn register(&mut self, spec: AgentSpec) -> Result<Agent> {
        if self.agents.contains_key(&spec.id) {
            return Err(Error::DuplicateAgent(spec.id));
        }
        let agent = Agent::from_spec(spec, Utc::now());
        mlog_debug!(
            "Registry::register id={} target={} role={}",
            agent.id,
            agent.target(),
            agent.role
        );
        self.agents.insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    /// Snapshot of one agent.
    pub fn get(&self, id: &str) -> Result<Agent> {
        self.agents
            .get(id)
            .cloned()
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Snapshot copy of all agents, not a live view.
    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Move an agent to a new status, enforcing the transition table.
    /// Same-state updates are an idempotent no-op.
    pub fn update_status(&mut self, id: &str, target: AgentStatus) -> Result<()> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        let from = agent.status;
        agent.transition(target)?;
        if from != target {
            mlog_debug!("Registry::update_status id={} {} -> {}", id, from, target);
        }
        Ok(())
    }

    /// Move an agent to `Unresponsive` if that transition is legal from its
    /// current status; otherwise leave it alone. Used by the dispatcher so a
    /// failed send against an already-Unresponsive (or Error) agent is not
    /// penalized twice.
    pub fn mark_unresponsive(&mut self, id: &str) {
        if let Some(agent) = self.agents.get_mut(id) {
            if agent.status.can_transition(AgentStatus::Unresponsive) {
                let from = agent.status;
                agent.status = AgentStatus::Unresponsive;
                mlog_debug!(
                    "Registry::mark_unresponsive id={} {} -> unresponsive",
                    id,
                    from
                );
            }
        }
    }

    /// Remove an agent. Idempotent: absent ids are not an error.
    pub fn deregister(&mut self, id: &str) -> bool {
        let removed = self.agents.remove(id).is_some();
        if removed {
            mlog_debug!("Registry::deregister id={}", id);
        }
        removed
    }

    /// Record a successful liveness signal and clear the failure streak.
    pub fn record_heartbeat(&mut self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.last_heartbeat = Some(at);
        agent.consecutive_failures = 0;
        Ok(())
    }

    /// Record a failed health check. Returns the new consecutive count.
    pub fn record_failure(&mut self, id: &str) -> Result<u32> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.consecutive_failures += 1;
        Ok(agent.consecutive_failures)
    }

    /// Record the fingerprint of freshly captured output. Returns true when
    /// the output changed since the previous observation.
    pub fn note_output(&mut self, id: &str, fingerprint: u64, at: DateTime<Utc>) -> Result<bool> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        let changed = agent.last_output_fingerprint != Some(fingerprint);
        agent.last_output_fingerprint = Some(fingerprint);
        if changed {
            // The idle clock starts from the last observed change
            agent.output_changed_at = Some(at);
        }
        Ok(changed)
    }

    pub fn note_message_sent(&mut self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.last_message_sent = Some(at);
        Ok(())
    }
}
