//! The coordination loop: the single driver of periodic work.
//!
//! One tick per interval, in order: fire due scheduled actions, then run
//! one health pass over all agents. Any single action or agent failing is
//! logged and never aborts the rest of the tick. The loop stops cleanly
//! through a `CancellationToken`, so tests shut it down without killing
//! the process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::orchestration::dispatch::MessageDispatcher;
use crate::orchestration::health::HealthMonitor;
use crate::orchestration::scheduler::Scheduler;
use crate::{mlog, mlog_debug, mlog_warn};

/// Sender id recorded on messages fired from scheduled actions.
pub const SCHEDULER_SENDER: &str = "scheduler";

pub struct CoordinationLoop {
    scheduler: Arc<RwLock<Scheduler>>,
    dispatcher: Arc<MessageDispatcher>,
    monitor: HealthMonitor,
    tick_interval: Duration,
    cancel: CancellationToken,
}

impl CoordinationLoop {
    pub fn new(
        scheduler: Arc<RwLock<Scheduler>>,
        dispatcher: Arc<MessageDispatcher>,
        monitor: HealthMonitor,
        tick_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            dispatcher,
            monitor,
            tick_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Token observers can use to stop the loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive ticks until cancelled. The first tick runs immediately.
    pub async fn run(&self) {
        mlog!(
            "Coordination loop started (tick every {:?})",
            self.tick_interval
        );
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    mlog!("Coordination loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One coordination cycle: fire due actions, then one health pass.
    pub async fn tick(&self) {
        mlog_debug!("Coordination tick");
        self.fire_due_actions().await;

        let events = self.monitor.check_all().await;
        for event in &events {
            mlog_debug!("Health event: {:?}", event);
        }
    }

    async fn fire_due_actions(&self) {
        let due = self.scheduler.write().await.due(Utc::now());
        for action in due {
            // The action is already marked fired; a dispatch failure is
            // logged, not retried (at-most-once).
            match self
                .dispatcher
                .send_from(SCHEDULER_SENDER, &action.target_agent_id, &action.payload)
                .await
            {
                Ok(message) => {
                    mlog!(
                        "Fired scheduled action {} -> {} (message {})",
                        action.id.short(),
                        action.target_agent_id,
                        message.id.short()
                    );
                }
                Err(e) => {
                    mlog_warn!(
                        "Scheduled action {} for {} failed: {}",
                        action.id.short(),
                        action.target_agent_id,
                        e
                    );
                }
            }
        }
    }
}
