//! Execution routing by kernel type.

use dashmap::DashMap;
use log::{debug, info, warn};
use neuralis_protocol::ExecutionResult;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::{ExecResult, ExecutionError, GatewayError};
use super::gateway::{self, GatewayBackend, GatewayClient, GatewayEndpoint};
use super::python::{Launcher, PythonBackend};
use super::queue::ExecutionQueue;
use super::{ExecutionBackend, ExecutionRequest};
use crate::command::CommandRunner;
use crate::conda::CondaRuntime;
use crate::config::ExecutionConfig;
use crate::container::DockerRuntime;
use crate::kernel::{Kernel, KernelBackend};

/// Owns the per-kernel queues and the gateway connections.
pub struct ExecutionRouter {
    runner: Arc<dyn CommandRunner>,
    docker: DockerRuntime,
    conda: CondaRuntime,
    http: reqwest::Client,
    config: ExecutionConfig,
    queues: DashMap<String, Arc<ExecutionQueue>>,
    /// Open gateway connections keyed by registry kernel id.
    gateways: DashMap<String, Arc<GatewayClient>>,
    /// Serializes gateway attach per kernel.
    connecting: DashMap<String, Arc<Mutex<()>>>,
}

impl ExecutionRouter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        docker: DockerRuntime,
        conda: CondaRuntime,
        config: ExecutionConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.gateway_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!("building gateway http client failed, using defaults: {e}");
                reqwest::Client::new()
            });
        Self {
            runner,
            docker,
            conda,
            http,
            config,
            queues: DashMap::new(),
            gateways: DashMap::new(),
            connecting: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Scratch directory for kernel executions that are not tied to a session.
    pub fn shared_scratch_dir(&self) -> PathBuf {
        self.config.temp_root_path().join("shared")
    }

    fn queue(&self, key: &str) -> Arc<ExecutionQueue> {
        self.queues
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(ExecutionQueue::spawn(key)))
            .clone()
    }

    fn process_backend(
        &self,
        launcher: Launcher,
        scratch_dir: PathBuf,
    ) -> Arc<dyn ExecutionBackend> {
        Arc::new(PythonBackend::new(
            Arc::clone(&self.runner),
            launcher,
            scratch_dir,
            self.config.process_timeout(),
        ))
    }

    /// Run code with a plain interpreter on the session's own queue.
    pub async fn execute_local(
        &self,
        session_id: &str,
        python: &str,
        request: ExecutionRequest,
        scratch_dir: PathBuf,
    ) -> ExecResult<ExecutionResult> {
        let backend = self.process_backend(Launcher::Interpreter(python.to_string()), scratch_dir);
        self.queue(&format!("session:{session_id}"))
            .submit(request, backend)
            .await
    }

    /// Run code on a kernel, queued behind earlier requests for that kernel.
    pub async fn execute_on_kernel(
        &self,
        kernel: &Kernel,
        request: ExecutionRequest,
        scratch_dir: PathBuf,
    ) -> ExecResult<ExecutionResult> {
        let backend = match kernel.backend {
            KernelBackend::Conda {
                ref environment, ..
            } => self.process_backend(
                Launcher::Conda {
                    runtime: self.conda.clone(),
                    env: environment.clone(),
                },
                scratch_dir,
            ),
            KernelBackend::Docker {
                ref container_id, ..
            } => self.process_backend(
                Launcher::Docker {
                    runtime: self.docker.clone(),
                    container: container_id.clone(),
                },
                scratch_dir,
            ),
            KernelBackend::Terminal { .. } => {
                let client = self.ensure_gateway(kernel).await?;
                Arc::new(GatewayBackend::new(client)) as Arc<dyn ExecutionBackend>
            }
        };

        debug!("queueing {} on {}", request.execution_id, kernel.id);
        self.queue(&kernel.id).submit(request, backend).await
    }

    fn open_gateway(&self, kernel_id: &str) -> Option<Arc<GatewayClient>> {
        self.gateways
            .get(kernel_id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|client| !client.is_closed())
    }

    async fn connect_guard(&self, kernel_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.connecting.entry(kernel_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Connect to a terminal kernel's gateway, starting a gateway kernel when
    /// none is attached yet.
    pub async fn ensure_gateway(&self, kernel: &Kernel) -> ExecResult<Arc<GatewayClient>> {
        if let Some(client) = self.open_gateway(&kernel.id) {
            return Ok(client);
        }

        let _connecting = self.connect_guard(&kernel.id).await;
        if let Some(client) = self.open_gateway(&kernel.id) {
            return Ok(client);
        }

        let KernelBackend::Terminal {
            ref kernel_name,
            ref gateway_kernel_id,
            ..
        } = kernel.backend
        else {
            return Err(ExecutionError::InvalidInput(format!(
                "kernel {} is not a gateway kernel",
                kernel.id
            )));
        };
        let endpoint = endpoint_for(kernel)?;

        let timeout = self.config.gateway_timeout();
        let gateway_id = match gateway_kernel_id {
            Some(id) => id.clone(),
            None => {
                let started = gateway::start_kernel(&self.http, &endpoint, kernel_name);
                let url = format!("{}/api/kernels", endpoint.http_base());
                tokio::time::timeout(timeout, started)
                    .await
                    .map_err(|_| GatewayError::Timeout(url))??
            }
        };
        let client = Arc::new(GatewayClient::connect(&endpoint, &gateway_id, timeout).await?);
        info!("attached {} to gateway kernel {gateway_id}", kernel.id);
        self.gateways.insert(kernel.id.clone(), Arc::clone(&client));
        Ok(client)
    }

    /// Gateway-side kernel id of an open connection.
    pub fn gateway_kernel_id(&self, kernel_id: &str) -> Option<String> {
        self.gateways
            .get(kernel_id)
            .map(|entry| entry.value().kernel_id().to_string())
    }

    /// Close the gateway connection of a kernel, keeping its queue.
    pub fn release_gateway(&self, kernel_id: &str) -> bool {
        self.gateways.remove(kernel_id).is_some()
    }

    /// Drop the queue and gateway connection of a kernel.
    pub fn release(&self, kernel_id: &str) {
        let queue = self.queues.remove(kernel_id).is_some();
        let gateway = self.release_gateway(kernel_id);
        self.connecting.remove(kernel_id);
        debug!("released {kernel_id} (queue: {queue}, gateway: {gateway})");
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    fn attached_gateway_id(&self, kernel: &Kernel) -> Option<String> {
        self.gateway_kernel_id(&kernel.id).or_else(|| match kernel.backend {
            KernelBackend::Terminal {
                ref gateway_kernel_id,
                ..
            } => gateway_kernel_id.clone(),
            _ => None,
        })
    }

    /// Interrupt the running cell of a gateway kernel.
    ///
    /// With no gateway kernel attached there is nothing to interrupt.
    pub async fn interrupt(&self, kernel: &Kernel) -> ExecResult<()> {
        let endpoint = endpoint_for(kernel)?;
        match self.attached_gateway_id(kernel) {
            Some(gateway_id) => {
                gateway::interrupt_kernel(&self.http, &endpoint, &gateway_id).await?;
                info!("interrupted {} (gateway kernel {gateway_id})", kernel.id);
            }
            None => debug!("{} has no gateway kernel to interrupt", kernel.id),
        }
        Ok(())
    }

    /// Restart the attached gateway kernel. Returns `false` when none is attached.
    pub async fn restart_gateway(&self, kernel: &Kernel) -> ExecResult<bool> {
        let endpoint = endpoint_for(kernel)?;
        let Some(gateway_id) = self.attached_gateway_id(kernel) else {
            return Ok(false);
        };
        gateway::restart_kernel(&self.http, &endpoint, &gateway_id).await?;
        info!("restarted gateway kernel {gateway_id} for {}", kernel.id);
        Ok(true)
    }
}

/// Gateway endpoint of a terminal kernel.
pub fn endpoint_for(kernel: &Kernel) -> ExecResult<GatewayEndpoint> {
    match kernel.backend {
        KernelBackend::Terminal {
            ref host,
            port,
            ref credentials,
            ..
        } => Ok(GatewayEndpoint::new(
            host.clone(),
            port,
            credentials.as_ref().and_then(|c| c.token.clone()),
        )),
        _ => Err(ExecutionError::InvalidInput(format!(
            "kernel {} ({}) does not support gateway operations",
            kernel.id,
            kernel.kernel_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandError, CommandOutput, CommandSpec};
    use crate::kernel::{KernelStatus, TerminalCredentials};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        programs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            self.programs.lock().unwrap().push(spec.display());
            Ok(CommandOutput {
                code: Some(0),
                stdout: "42\n".into(),
                stderr: String::new(),
            })
        }
    }

    fn router(runner: Arc<Recorder>) -> ExecutionRouter {
        ExecutionRouter::new(
            runner.clone(),
            DockerRuntime::new("docker", runner.clone()),
            CondaRuntime::new("conda", runner),
            ExecutionConfig::default(),
        )
    }

    fn kernel(id: &str, backend: KernelBackend) -> Kernel {
        Kernel {
            id: id.into(),
            name: id.into(),
            language: "python".into(),
            python_version: None,
            status: KernelStatus::Active,
            created_at: Utc::now(),
            backend,
        }
    }

    #[tokio::test]
    async fn test_docker_kernel_routes_to_exec() {
        let runner = Arc::new(Recorder::default());
        let router = router(runner.clone());
        let docker = kernel(
            "docker_abc",
            KernelBackend::Docker {
                container_id: "abc".into(),
                container_name: None,
                image: "python:3.11".into(),
                ports: vec![],
                ip_address: None,
            },
        );

        let result = router
            .execute_on_kernel(&docker, ExecutionRequest::new("6*7"), std::env::temp_dir())
            .await
            .unwrap();
        assert_eq!(result.kernel_id, "docker_abc");
        assert_eq!(result.text(), "42\n");
        assert!(runner.programs.lock().unwrap()[0].starts_with("docker exec -i abc python -"));
        assert_eq!(router.queue_count(), 1);

        router.release("docker_abc");
        assert_eq!(router.queue_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_get_their_own_queue() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let router = router(runner.clone());

        let result = router
            .execute_local("s1", "python3", ExecutionRequest::new("6*7"), dir.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(result.kernel_id, "session:s1");
        assert_eq!(result.execution_count, 1);
        assert!(runner.programs.lock().unwrap()[0].starts_with("python3 "));
    }

    #[test]
    fn test_endpoint_for_terminal_only() {
        let terminal = kernel(
            "terminal_x",
            KernelBackend::Terminal {
                host: "gw".into(),
                port: 8888,
                connection_id: "x".into(),
                credentials: Some(TerminalCredentials {
                    username: None,
                    token: Some("t0k".into()),
                    password: None,
                }),
                kernel_name: "python3".into(),
                gateway_kernel_id: None,
            },
        );
        let endpoint = endpoint_for(&terminal).unwrap();
        assert_eq!(endpoint.token.as_deref(), Some("t0k"));

        let conda = kernel(
            "conda_ds",
            KernelBackend::Conda {
                environment: "ds".into(),
                path: "/envs/ds".into(),
                packages: vec![],
            },
        );
        assert!(matches!(
            endpoint_for(&conda),
            Err(ExecutionError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_interrupt_without_gateway_kernel_is_noop() {
        let router = router(Arc::new(Recorder::default()));
        let terminal = kernel(
            "terminal_y",
            KernelBackend::Terminal {
                host: "127.0.0.1".into(),
                port: 1,
                connection_id: "y".into(),
                credentials: None,
                kernel_name: "python3".into(),
                gateway_kernel_id: None,
            },
        );
        router.interrupt(&terminal).await.unwrap();
        assert!(!router.restart_gateway(&terminal).await.unwrap());
    }
}
