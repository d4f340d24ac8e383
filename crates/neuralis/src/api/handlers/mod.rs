//! API request handlers.
//!
//! Organized by domain:
//! - `containers`: Kernel Gateway container provisioning
//! - `kernels`: kernel lifecycle and execution
//! - `sessions`: session workspaces and session-scoped execution
//! - `assistant`: Amazon Q bridge
//! - `misc`: health and tool availability checks

mod assistant;
mod containers;
mod kernels;
mod misc;
mod sessions;

use serde::Serialize;

pub use assistant::{amazon_q_check, ask_amazon_q};
pub use containers::{
    container_logs, create_container, delete_container, list_containers, restart_container,
};
pub use kernels::{
    create_kernel, delete_kernel, execute_on_kernel, get_kernel, interrupt_kernel, list_kernels,
    restart_kernel, start_kernel, stop_kernel, update_kernel,
};
pub use misc::{conda_check, docker_check, health};
pub use sessions::{
    bind_session_kernel, close_session, create_session, execute_in_session, get_session,
    list_sessions,
};

/// `{"success": true}` acknowledgement.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
