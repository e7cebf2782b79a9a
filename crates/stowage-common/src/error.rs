use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("upload is not active: {0}")]
    UploadNotActive(String),
    #[error("upload {upload_id} was already finalized")]
    UploadPreviouslyFinalized { upload_id: String, status: Option<u16> },
    #[error("upload cannot be cancelled: {0}")]
    NotCancellable(String),
    #[error("ruleset failed to compile: {}", .0.join("; "))]
    RulesCompile(Vec<String>),
    #[error("rules evaluator unavailable: {0}")]
    EvaluatorUnavailable(String),
    #[error("cloud functions dispatch failed: {0}")]
    Dispatch(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(what: impl Into<String>) -> Self {
        Self::Forbidden(what.into())
    }

    /// Status code the HTTP routers answer with for this error kind.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Forbidden(_) => 403,
            Self::UploadNotActive(_) => 404,
            Self::UploadPreviouslyFinalized { status, .. } => status.unwrap_or(200),
            Self::NotCancellable(_) => 400,
            Self::RulesCompile(_) | Self::InvalidArgument(_) => 400,
            Self::EvaluatorUnavailable(_) => 503,
            Self::Dispatch(_) | Self::InternalError(_) | Self::Io(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
