use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[cfg(feature = "mongodb")]
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON serialization error: {0}")]
    BsonSerialization(#[from] bson::ser::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON deserialization error: {0}")]
    BsonDeserialization(#[from] bson::de::Error),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// The remote store refused the write (4xx class); retrying will not help
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// Network or server-side failure (5xx class); safe to retry
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PersistError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "mongodb")]
            PersistError::Database(e) => {
                use mongodb::error::ErrorKind;
                e.contains_label(mongodb::error::RETRYABLE_WRITE_ERROR)
                    || matches!(
                        *e.kind,
                        ErrorKind::Io(_)
                            | ErrorKind::ServerSelection { .. }
                            | ErrorKind::ConnectionPoolCleared { .. }
                    )
            }
            PersistError::Unavailable(_) | PersistError::Connection(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PersistError::Unavailable("503".to_string()).is_transient());
        assert!(PersistError::Connection("reset".to_string()).is_transient());
        assert!(!PersistError::Rejected("thread deleted".to_string()).is_transient());
        assert!(!PersistError::ThreadNotFound("t1".to_string()).is_transient());
    }
}
