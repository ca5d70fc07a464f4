use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("invalid argument in {caller}(): {reason}")]
    InvalidArgument { caller: &'static str, reason: String },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("mutex lock request expired for digest {id} after {attempts} attempts")]
    LockTimeout { id: String, attempts: u32 },
    #[error("mutex could not be unlocked for digest {id}")]
    UnlockFailure { id: String },
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl DigestError {
    pub fn invalid(caller: &'static str, reason: impl Into<String>) -> Self {
        DigestError::InvalidArgument {
            caller,
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        DigestError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type DigestResult<T> = Result<T, DigestError>;
