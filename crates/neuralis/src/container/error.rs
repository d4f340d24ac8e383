//! Docker provisioning error types.

use thiserror::Error;

use crate::command::CommandError;
use crate::validate::ValidationError;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The docker command exited with a non-zero status.
    #[error("docker {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// The docker binary could not be started.
    #[error("failed to start docker {command}: {message}")]
    ProcessSpawnFailed { command: String, message: String },

    /// `docker --version` failed.
    #[error("docker is unavailable: {0}")]
    DockerUnavailable(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Failed to parse docker output.
    #[error("failed to parse docker output: {0}")]
    ParseError(String),

    #[error("docker {command} timed out")]
    Timeout { command: String },

    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    pub(crate) fn from_command(command: &str, err: CommandError) -> Self {
        match err {
            CommandError::Spawn { source, .. } => ContainerError::ProcessSpawnFailed {
                command: command.to_string(),
                message: source.to_string(),
            },
            CommandError::Timeout { .. } => ContainerError::Timeout {
                command: command.to_string(),
            },
            CommandError::Io { source, .. } => ContainerError::Io(source),
        }
    }
}
