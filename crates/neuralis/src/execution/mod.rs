//! Code execution.
//!
//! Requests are routed to a backend by kernel type and run through a FIFO
//! queue per kernel (or per session when no kernel is bound).

mod error;
pub mod gateway;
pub mod python;
mod queue;
mod router;

pub use error::{ExecResult, ExecutionError, GatewayError};
pub use gateway::{GatewayBackend, GatewayClient, GatewayEndpoint};
pub use python::{Launcher, PythonBackend};
pub use queue::ExecutionQueue;
pub use router::ExecutionRouter;

use async_trait::async_trait;
use neuralis_protocol::OutputEvent;
use serde::{Deserialize, Serialize};

fn new_execution_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One request to run code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Correlation id echoed in the result; generated when absent.
    #[serde(default = "new_execution_id")]
    pub execution_id: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            execution_id: new_execution_id(),
            code: code.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Something that can run a piece of code and report its outputs.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, code: &str, execution_count: u64) -> ExecResult<Vec<OutputEvent>>;
}
