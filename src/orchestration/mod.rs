//! Orchestration layer for the marshal coordination core.
//!
//! This module composes the registry and the multiplexer into the moving
//! parts of the system: the message dispatcher, the health monitor, the
//! one-shot action scheduler, and the coordination loop that drives them
//! on a fixed tick.

mod coordinator;
mod dispatch;
mod health;
mod scheduler;

pub use coordinator::{CoordinationLoop, SCHEDULER_SENDER};
pub use dispatch::{
    DispatchConfig, DispatchOutcome, Message, MessageDispatcher, MessageId, OPERATOR_SENDER,
};
pub use health::{
    HealthConfig, HealthEvent, HealthMonitor, DEFAULT_CHECK_TIMEOUT_SECS,
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_IDLE_THRESHOLD_SECS,
};
pub use scheduler::{ActionId, ScheduledAction, Scheduler};
