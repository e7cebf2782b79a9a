use std::path::PathBuf;
use std::time::Duration;

use stowage_common::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RulesError>;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to spawn rules evaluator: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("rules evaluator is not running")]
    NotRunning,
    #[error("rules evaluator exited")]
    ProcessExited,
    #[error("rules evaluator not found at {}; setup required", .0.display())]
    BinaryMissing(PathBuf),
    #[error("failed to download rules evaluator: {0}")]
    Download(String),
    #[error("rules protocol encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("attempted to send rules request with stale id {0}")]
    StaleRequestId(i64),
    #[error("there was an issue starting the rules evaluator: {0}")]
    FatalStartup(String),
    #[error("rules evaluator did not report ready within {0:?}")]
    StartupTimeout(Duration),
    #[error("rules runtime error ({status}): {message}")]
    Runtime { status: String, message: String },
    #[error("ruleset failed to compile: {}", .0.join("; "))]
    Compile(Vec<String>),
    #[error("rules lock poisoned: {0}")]
    LockPoisoned(&'static str),
    #[error("firestore document fetch failed: {0}")]
    DocumentFetch(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<RulesError> for StorageError {
    fn from(err: RulesError) -> Self {
        match err {
            RulesError::Compile(errors) => StorageError::RulesCompile(errors),
            other => StorageError::EvaluatorUnavailable(other.to_string()),
        }
    }
}
