//! Execution error types.

use thiserror::Error;

use crate::command::CommandError;
use crate::conda::CondaError;
use crate::container::ContainerError;

pub type ExecResult<T> = Result<T, ExecutionError>;

/// Errors talking to a Jupyter Kernel Gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to connect to kernel gateway at {url}: {message}")]
    Connect { url: String, message: String },

    #[error("kernel gateway returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("kernel gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("kernel gateway timed out waiting for {0}")]
    Timeout(String),

    #[error("kernel gateway connection closed")]
    Closed,

    #[error("invalid kernel gateway response: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The interpreter process could not be started or timed out.
    #[error(transparent)]
    Process(#[from] CommandError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Conda(#[from] CondaError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker for a queue stopped before answering.
    #[error("execution queue {0} is closed")]
    QueueClosed(String),

    #[error("invalid execution request: {0}")]
    InvalidInput(String),
}
