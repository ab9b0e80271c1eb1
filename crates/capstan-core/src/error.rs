//! Error types for capstan.

use thiserror::Error;

/// Fatal configuration errors, detected before any job is dispatched.
///
/// A whole-run abort: if the declaration is bad the scheduler never starts.
/// Step command failures are not errors at this level; they are recorded in
/// the run report as failed outcomes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("job '{job}' needs unknown job '{needs}'")]
    UnknownDependency { job: String, needs: String },

    #[error("invalid ref pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("pipeline declares no jobs")]
    EmptyPipeline,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("failed to spawn step '{step}': {message}")]
    Spawn { step: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
