use thiserror::Error;

#[derive(Debug, Error)]
pub enum NudgeError {
    #[error("store {op} failed for key '{key}': {message}")]
    Store {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("session not found or expired: {0}")]
    SessionNotFound(String),

    #[error("stale session '{id}': expected version {expected}, found {actual}")]
    StaleSession {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("session '{id}' holds a '{actual}' payload, not '{expected}'")]
    SessionKindMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl NudgeError {
    /// Build a [`NudgeError::Store`] carrying the operation and key it failed on.
    pub fn store(op: &'static str, key: impl Into<String>, message: impl ToString) -> Self {
        Self::Store {
            op,
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// True for stale-reference errors: the caller should restart the flow.
    pub fn is_stale_reference(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::StaleSession { .. } | Self::SessionKindMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, NudgeError>;
