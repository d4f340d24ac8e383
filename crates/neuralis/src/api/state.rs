//! Application state shared across handlers.

use std::sync::Arc;

use crate::assistant::AmazonQ;
use crate::command::CommandRunner;
use crate::conda::CondaRuntime;
use crate::config::AppConfig;
use crate::container::{ContainerService, DockerRuntime};
use crate::execution::ExecutionRouter;
use crate::kernel::KernelService;
use crate::session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub containers: Arc<ContainerService>,
    pub kernels: Arc<KernelService>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<ExecutionRouter>,
    pub assistant: Arc<AmazonQ>,
}

impl AppState {
    /// Wire every service from configuration. All external programs run
    /// through `runner`.
    pub fn new(config: AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let docker = DockerRuntime::new(&config.docker.binary, Arc::clone(&runner));
        let conda = CondaRuntime::new(&config.conda.binary, Arc::clone(&runner));

        let router = Arc::new(ExecutionRouter::new(
            Arc::clone(&runner),
            docker.clone(),
            conda.clone(),
            config.execution.clone(),
        ));
        let containers = Arc::new(ContainerService::new(docker, config.docker.clone()));
        let kernels = Arc::new(KernelService::new(
            Arc::clone(&containers),
            conda,
            Arc::clone(&router),
        ));
        let sessions = Arc::new(SessionManager::new(
            config.execution.temp_root_path(),
            &config.execution.python_binary,
        ));
        let assistant = Arc::new(AmazonQ::new(&config.assistant, runner));

        Self {
            config: Arc::new(config),
            containers,
            kernels,
            sessions,
            router,
            assistant,
        }
    }
}
