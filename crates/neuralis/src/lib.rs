//! Neuralis kernel backend library.
//!
//! Provisions Python kernels through the docker, conda and Amazon Q command
//! line tools, tracks them in an in-memory registry and routes code execution
//! to the matching backend.

pub mod api;
pub mod assistant;
pub mod command;
pub mod conda;
pub mod config;
pub mod container;
pub mod execution;
pub mod kernel;
pub mod session;
pub mod validate;
