use thiserror::Error;

/// Errors returned to callers of local sync operations.
///
/// Remote failures never surface here; they are retried in the background and
/// reported as `sync_warning` events.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync engine is not initialized")]
    NotInitialized,

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Cannot reassign threads of project {project} to {target}")]
    InvalidReassignment { project: String, target: String },

    #[error("Message {0} is no longer streaming")]
    StreamClosed(String),

    #[error("{0} is required")]
    MissingComponent(&'static str),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
