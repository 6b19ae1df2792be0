use common::api_error::ApiError;

/// Errors that fail a reconciliation tick. The outer loop retries them with backoff.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("raft error: node name should not exceed {limit} characters: {name}")]
    NameTooLong { name: String, limit: usize },
    #[error("empty quorum configuration")]
    EmptyQuorum,
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },
    #[error("conflict writing {kind} {key}: object was modified")]
    Conflict { kind: &'static str, key: String },
    #[error("invalid cluster spec: {0}")]
    InvalidSpec(String),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SupervisorError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        SupervisorError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SupervisorError::NotFound { .. })
    }
}

impl From<SupervisorError> for ApiError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::NotFound { .. } => ApiError::NotFound,
            SupervisorError::Conflict { .. } | SupervisorError::AlreadyExists { .. } => {
                ApiError::Conflict(e.to_string())
            }
            SupervisorError::InvalidSpec(_) | SupervisorError::NameTooLong { .. } => {
                ApiError::Invalid(e.to_string())
            }
            other => ApiError::Any(anyhow::Error::new(other)),
        }
    }
}
