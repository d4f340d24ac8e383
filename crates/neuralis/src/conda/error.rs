//! Conda provisioning error types.

use thiserror::Error;

use crate::command::CommandError;
use crate::validate::ValidationError;

pub type CondaResult<T> = Result<T, CondaError>;

#[derive(Debug, Error)]
pub enum CondaError {
    /// The conda command exited with a non-zero status.
    #[error("conda {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// The conda binary could not be started.
    #[error("failed to start conda {command}: {message}")]
    ProcessSpawnFailed { command: String, message: String },

    /// `conda --version` failed.
    #[error("conda is unavailable: {0}")]
    CondaUnavailable(String),

    #[error("conda environment not found: {0}")]
    EnvironmentNotFound(String),

    /// Failed to parse `conda info --envs` output.
    #[error("failed to parse conda output: {0}")]
    ParseError(String),

    #[error("conda {command} timed out")]
    Timeout { command: String },

    #[error(transparent)]
    InvalidInput(#[from] ValidationError),
}

impl CondaError {
    pub(crate) fn from_command(command: &str, err: CommandError) -> Self {
        match err {
            CommandError::Spawn { source, .. } => CondaError::ProcessSpawnFailed {
                command: command.to_string(),
                message: source.to_string(),
            },
            CommandError::Timeout { .. } => CondaError::Timeout {
                command: command.to_string(),
            },
            CommandError::Io { source, .. } => CondaError::CommandFailed {
                command: command.to_string(),
                message: source.to_string(),
            },
        }
    }
}
