//! Kernel lifecycle error types.

use thiserror::Error;

use crate::conda::CondaError;
use crate::container::ContainerError;
use crate::execution::{ExecutionError, GatewayError};
use crate::validate::ValidationError;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel not found: {0}")]
    NotFound(String),

    #[error("kernel already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid kernel request: {0}")]
    InvalidInput(String),

    /// A terminal kernel's gateway did not accept a TCP connection.
    #[error("kernel gateway at {host}:{port} is unreachable: {message}")]
    Unreachable {
        host: String,
        port: u16,
        message: String,
    },

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Conda(#[from] CondaError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<ValidationError> for KernelError {
    fn from(err: ValidationError) -> Self {
        KernelError::InvalidInput(err.to_string())
    }
}
