//! HTTP API module.
//!
//! REST endpoints for containers, kernels, sessions, code execution and the
//! Amazon Q assistant.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
