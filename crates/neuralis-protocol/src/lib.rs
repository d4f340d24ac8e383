//! Wire types for the Neuralis kernel backend.
//!
//! - [`jupyter`]: the Jupyter kernel message envelope spoken with a Kernel
//!   Gateway over its `/api/kernels/<id>/channels` WebSocket.
//! - [`output`]: the execution output model returned to notebook clients.

pub mod jupyter;
pub mod output;

pub use jupyter::{ExecutionState, IoPub, KernelMessage, MessageHeader, MimeBundle};
pub use output::{ExecutionResult, ExecutionStatus, ImageData, OutputEvent, OutputKind};
