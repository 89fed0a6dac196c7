use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Tmux error: {0}")]
    Tmux(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Window not found: {session}:{window}")]
    WindowNotFound { session: String, window: u32 },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid delay: must be greater than zero")]
    InvalidDelay,

    #[error("Target unavailable for agent '{agent}': {reason}")]
    TargetUnavailable { agent: String, reason: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Process exit code for the CLI: 0 success, 1 target-not-found,
    /// 2 invalid-argument, 3 internal/timeout.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::SessionNotFound(_)
            | Error::WindowNotFound { .. }
            | Error::AgentNotFound(_)
            | Error::TargetUnavailable { .. } => 1,
            Error::DuplicateAgent(_)
            | Error::InvalidTransition { .. }
            | Error::InvalidDelay
            | Error::Validation(_) => 2,
            _ => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
