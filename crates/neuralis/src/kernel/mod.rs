//! Kernel registry and lifecycle.

mod error;
mod models;
mod registry;
mod service;
pub mod terminal;

pub use error::{KernelError, KernelResult};
pub use models::{
    ConnectTerminalKernel, CreateCondaKernel, CreateDockerKernel, Kernel, KernelBackend,
    KernelPatch, KernelStatus, KernelType, PackageList, TerminalCredentials, language_for_image,
};
pub use registry::KernelRegistry;
pub use service::{KernelService, merge_discovered};
