pub mod agent;
pub mod config;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod registry;
pub mod tmux;
pub mod util;

pub use agent::{Agent, AgentRole, AgentSpec, AgentStatus};
pub use error::{Error, Result};
pub use registry::AgentRegistry;
