//! Execution sessions and their scratch directories.

mod models;
mod service;

pub use models::{BindKernel, CreateSession, Session, SessionSummary};
pub use service::{SESSION_STATE_FILE, SessionManager};
