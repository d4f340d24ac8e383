//! Kernel lifecycle across conda, docker and Kernel Gateway backends.

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use neuralis_protocol::ExecutionResult;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::{KernelError, KernelResult};
use super::models::{
    ConnectTerminalKernel, CreateCondaKernel, CreateDockerKernel, Kernel, KernelBackend,
    KernelPatch, KernelStatus, KernelType, language_for_image,
};
use super::registry::KernelRegistry;
use super::terminal;
use crate::conda::{CondaEnv, CondaRuntime};
use crate::container::{
    BuildRequest, ContainerConfig, ContainerRecord, ContainerService, PortMapping,
};
use crate::execution::{ExecutionRequest, ExecutionRouter};
use crate::validate;

/// Docker's short container id.
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn conda_kernel(env: CondaEnv) -> Kernel {
    Kernel {
        id: KernelType::Conda.kernel_id(&env.name),
        name: env.name.clone(),
        language: "python".to_string(),
        python_version: env.python_version,
        status: KernelStatus::Active,
        created_at: Utc::now(),
        backend: KernelBackend::Conda {
            environment: env.name,
            path: env.path,
            packages: env.packages,
        },
    }
}

fn docker_kernel(record: ContainerRecord) -> Kernel {
    let status = if record.is_running() {
        KernelStatus::Active
    } else {
        KernelStatus::Inactive
    };
    let container_id = short_id(&record.id).to_string();
    Kernel {
        id: KernelType::Docker.kernel_id(&container_id),
        name: record.name.clone(),
        language: language_for_image(&record.image).to_string(),
        python_version: None,
        status,
        created_at: Utc::now(),
        backend: KernelBackend::Docker {
            container_id,
            container_name: Some(record.name),
            image: record.image,
            ports: Vec::new(),
            ip_address: None,
        },
    }
}

/// Merge live-discovered kernels with registered ones.
///
/// Discovered kernels come first in discovery order, followed by registered
/// kernels that were not discovered. A registered entry replaces its
/// discovered twin, except that a docker kernel takes the live container
/// status unless it is restarting.
pub fn merge_discovered(discovered: Vec<Kernel>, registered: Vec<Kernel>) -> Vec<Kernel> {
    let by_id: HashMap<&str, &Kernel> = registered.iter().map(|k| (k.id.as_str(), k)).collect();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(discovered.len() + registered.len());

    for live in discovered {
        if !seen.insert(live.id.clone()) {
            continue;
        }
        match by_id.get(live.id.as_str()) {
            Some(known) => {
                let mut kernel = (*known).clone();
                if kernel.kernel_type() == KernelType::Docker
                    && kernel.status != KernelStatus::Restarting
                {
                    kernel.status = live.status;
                }
                merged.push(kernel);
            }
            None => merged.push(live),
        }
    }

    for kernel in &registered {
        if !seen.contains(&kernel.id) {
            merged.push(kernel.clone());
        }
    }
    merged
}

/// Creates, tracks and drives kernels.
pub struct KernelService {
    registry: KernelRegistry,
    containers: Arc<ContainerService>,
    conda: CondaRuntime,
    router: Arc<ExecutionRouter>,
    /// Serializes lifecycle operations per kernel id.
    locks: DashMap<String, Arc<Mutex<()>>>,
    probe_timeout: Duration,
    gateway_kernel_name: String,
}

impl KernelService {
    pub fn new(
        containers: Arc<ContainerService>,
        conda: CondaRuntime,
        router: Arc<ExecutionRouter>,
    ) -> Self {
        let gateway_kernel_name = router.config().gateway_kernel_name.clone();
        Self {
            registry: KernelRegistry::new(),
            containers,
            conda,
            router,
            locks: DashMap::new(),
            probe_timeout: terminal::DEFAULT_PROBE_TIMEOUT,
            gateway_kernel_name,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn conda(&self) -> &CondaRuntime {
        &self.conda
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    async fn guard(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    async fn discover(&self) -> Vec<Kernel> {
        let mut discovered = Vec::new();

        match self.conda.discover().await {
            Ok(envs) => discovered.extend(envs.into_iter().map(conda_kernel)),
            Err(e) => warn!("conda discovery failed: {e}"),
        }

        match self.containers.docker().list_all().await {
            Ok(records) => discovered.extend(records.into_iter().map(docker_kernel)),
            Err(e) => warn!("docker discovery failed: {e}"),
        }

        discovered
    }

    /// Discovered and registered kernels, deduplicated by id.
    pub async fn list(&self) -> Vec<Kernel> {
        let discovered = self.discover().await;
        merge_discovered(discovered, self.registry.list().await)
    }

    /// A registered kernel, or a discovered one which is then registered.
    async fn resolve(&self, id: &str) -> KernelResult<Kernel> {
        match self.registry.get(id).await {
            Ok(kernel) => return Ok(kernel),
            Err(KernelError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let found = self.discover().await.into_iter().find(|k| k.id == id);
        match found {
            Some(kernel) => {
                debug!("adopting discovered kernel {id}");
                match self.registry.insert(kernel).await {
                    Ok(kernel) => Ok(kernel),
                    Err(KernelError::AlreadyExists(_)) => self.registry.get(id).await,
                    Err(e) => Err(e),
                }
            }
            None => Err(KernelError::NotFound(id.to_string())),
        }
    }

    pub async fn get(&self, id: &str) -> KernelResult<Kernel> {
        self.resolve(id).await
    }

    /// Create a kernel from a JSON body; `kernel_type` picks the backend.
    pub async fn create(
        &self,
        kernel_type: &str,
        body: serde_json::Value,
    ) -> KernelResult<Kernel> {
        let invalid = |e: serde_json::Error| KernelError::InvalidInput(e.to_string());
        match kernel_type.parse::<KernelType>()? {
            KernelType::Conda => {
                self.create_conda(serde_json::from_value(body).map_err(invalid)?)
                    .await
            }
            KernelType::Docker => {
                self.create_docker(serde_json::from_value(body).map_err(invalid)?)
                    .await
            }
            KernelType::Terminal => {
                self.connect_terminal(serde_json::from_value(body).map_err(invalid)?)
                    .await
            }
        }
    }

    pub async fn create_conda(&self, request: CreateCondaKernel) -> KernelResult<Kernel> {
        validate::validate_env_name(&request.name)?;
        let python_version = request
            .python_version
            .unwrap_or_else(|| self.containers.config().default_python_version.clone());
        validate::validate_python_version(&python_version)?;
        let packages = request.packages.into_validated()?;

        let id = KernelType::Conda.kernel_id(&request.name);
        let _guard = self.guard(&id).await;
        if self.registry.contains(&id).await {
            return Err(KernelError::AlreadyExists(id));
        }

        let env = self
            .conda
            .create_env(&request.name, &python_version, &packages)
            .await?;
        info!("created conda kernel {id} at {}", env.path);

        self.registry.insert(conda_kernel(env)).await
    }

    /// Create a docker kernel. A kernel already registered for the same
    /// container name is dropped once the new container is up.
    pub async fn create_docker(&self, request: CreateDockerKernel) -> KernelResult<Kernel> {
        let defaults = self.containers.config();
        let name = match (request.name, &request.image) {
            (Some(name), _) => name,
            (None, Some(_)) => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("{}-{}", defaults.container_prefix, &suffix[..8])
            }
            (None, None) => format!(
                "{}-{}",
                defaults.container_prefix,
                request
                    .python_version
                    .as_deref()
                    .unwrap_or(&defaults.default_python_version)
            ),
        };
        let _guard = self.guard(&format!("container:{name}")).await;

        let kernel = match request.image {
            Some(image) => {
                let config = ContainerConfig::new(&image)
                    .name(&name)
                    .ports(request.ports.iter().copied());
                config.validate()?;

                let docker = self.containers.docker();
                let full_id = docker.run_container(&config).await?;
                let container_id = short_id(&full_id).to_string();
                let ip_address = match docker.inspect_ip(&container_id).await {
                    Ok(ip) => ip,
                    Err(e) => {
                        warn!("could not inspect container {container_id}: {e}");
                        None
                    }
                };

                Kernel {
                    id: KernelType::Docker.kernel_id(&container_id),
                    name: name.clone(),
                    language: language_for_image(&image).to_string(),
                    python_version: request.python_version,
                    status: KernelStatus::Active,
                    created_at: Utc::now(),
                    backend: KernelBackend::Docker {
                        container_id,
                        container_name: Some(name.clone()),
                        image,
                        ports: request.ports,
                        ip_address,
                    },
                }
            }
            None => {
                let outcome = self
                    .containers
                    .build_kernel_container(BuildRequest {
                        python_version: request.python_version,
                        port: request.port,
                        name: Some(name.clone()),
                        packages: request.packages.into_validated()?,
                    })
                    .await?;
                let container = outcome.container;
                let container_id = short_id(&container.id).to_string();

                Kernel {
                    id: KernelType::Docker.kernel_id(&container_id),
                    name: container.name.clone(),
                    language: "python".to_string(),
                    python_version: Some(container.python_version),
                    status: KernelStatus::Active,
                    created_at: container.created_at,
                    backend: KernelBackend::Docker {
                        container_id,
                        container_name: Some(container.name),
                        image: container.image,
                        ports: vec![PortMapping::same(container.port)],
                        ip_address: None,
                    },
                }
            }
        };

        self.evict_container_kernels(&name, &kernel.id).await;
        info!("created docker kernel {} ({})", kernel.id, kernel.name);
        self.registry.insert(kernel).await
    }

    /// Unregister docker kernels bound to `name` other than `keep`.
    async fn evict_container_kernels(&self, name: &str, keep: &str) {
        let stale: Vec<String> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|kernel| kernel.id != keep)
            .filter(|kernel| {
                matches!(
                    kernel.backend,
                    KernelBackend::Docker { ref container_name, .. }
                        if container_name.as_deref() == Some(name)
                )
            })
            .map(|kernel| kernel.id)
            .collect();

        for id in stale {
            self.registry.remove(&id).await;
            self.router.release(&id);
            info!("dropped kernel {id}: container {name} was replaced");
        }
    }

    async fn probe(&self, host: &str, port: u16) -> KernelResult<()> {
        terminal::probe(host, port, self.probe_timeout)
            .await
            .map_err(|e| KernelError::Unreachable {
                host: host.to_string(),
                port,
                message: e.to_string(),
            })
    }

    /// Register a remote Kernel Gateway after checking it accepts connections.
    pub async fn connect_terminal(&self, request: ConnectTerminalKernel) -> KernelResult<Kernel> {
        validate::validate_host(&request.host)?;
        validate::validate_port(request.port)?;
        if let Some(ref id) = request.gateway_kernel_id {
            validate::validate_gateway_kernel_id(id)?;
        }
        let kernel_name = request
            .kernel_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.gateway_kernel_name.clone());

        self.probe(&request.host, request.port).await?;

        let connection_id = uuid::Uuid::new_v4().to_string();
        let kernel = Kernel {
            id: KernelType::Terminal.kernel_id(&connection_id),
            name: request
                .name
                .unwrap_or_else(|| format!("Terminal ({}:{})", request.host, request.port)),
            language: "python".to_string(),
            python_version: None,
            status: KernelStatus::Active,
            created_at: Utc::now(),
            backend: KernelBackend::Terminal {
                host: request.host,
                port: request.port,
                connection_id,
                credentials: request.credentials,
                kernel_name,
                gateway_kernel_id: request.gateway_kernel_id,
            },
        };

        info!("connected terminal kernel {} ({})", kernel.id, kernel.name);
        self.registry.insert(kernel).await
    }

    async fn set_status(&self, id: &str, status: KernelStatus) -> KernelResult<Kernel> {
        self.registry.modify(id, |kernel| kernel.status = status).await
    }

    pub async fn start(&self, id: &str) -> KernelResult<Kernel> {
        let _guard = self.guard(id).await;
        let kernel = self.resolve(id).await?;

        match kernel.backend {
            KernelBackend::Conda { .. } => {}
            KernelBackend::Docker {
                ref container_id, ..
            } => self.containers.docker().start_container(container_id).await?,
            KernelBackend::Terminal { ref host, port, .. } => self.probe(host, port).await?,
        }

        info!("started kernel {id}");
        self.set_status(id, KernelStatus::Active).await
    }

    pub async fn stop(&self, id: &str) -> KernelResult<Kernel> {
        let _guard = self.guard(id).await;
        let kernel = self.resolve(id).await?;

        match kernel.backend {
            KernelBackend::Conda { .. } => {}
            KernelBackend::Docker {
                ref container_id, ..
            } => self.containers.docker().stop_container(container_id).await?,
            KernelBackend::Terminal { .. } => {
                self.router.release_gateway(id);
            }
        }

        info!("stopped kernel {id}");
        self.set_status(id, KernelStatus::Inactive).await
    }

    /// Restart a kernel. The kernel is `restarting` while the backend call
    /// runs; on failure its previous status is restored.
    pub async fn restart(&self, id: &str) -> KernelResult<Kernel> {
        let _guard = self.guard(id).await;
        let kernel = self.resolve(id).await?;
        let previous = kernel.status;
        self.set_status(id, KernelStatus::Restarting).await?;

        let outcome: KernelResult<()> = match kernel.backend {
            KernelBackend::Conda { .. } => Ok(()),
            KernelBackend::Docker {
                ref container_id, ..
            } => self
                .containers
                .docker()
                .restart_container(container_id)
                .await
                .map_err(KernelError::from),
            KernelBackend::Terminal { ref host, port, .. } => {
                match self.router.restart_gateway(&kernel).await {
                    Ok(true) => Ok(()),
                    Ok(false) => self.probe(host, port).await,
                    Err(e) => Err(e.into()),
                }
            }
        };

        match outcome {
            Ok(()) => {
                info!("restarted kernel {id}");
                self.set_status(id, KernelStatus::Active).await
            }
            Err(e) => {
                warn!("restart of {id} failed: {e}");
                self.set_status(id, previous).await?;
                Err(e)
            }
        }
    }

    pub async fn update(&self, id: &str, patch: KernelPatch) -> KernelResult<Kernel> {
        if patch.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(KernelError::InvalidInput("name must not be empty".into()));
        }
        let _guard = self.guard(id).await;
        self.resolve(id).await?;
        self.registry.update(id, &patch).await
    }

    /// Forget a kernel and release its queue and gateway connection. The
    /// backend itself (environment, container, gateway) is left untouched.
    pub async fn remove(&self, id: &str) -> KernelResult<Kernel> {
        let removed = {
            let _guard = self.guard(id).await;
            self.registry
                .remove(id)
                .await
                .ok_or_else(|| KernelError::NotFound(id.to_string()))?
        };
        self.router.release(id);
        self.locks.remove(id);
        info!("removed kernel {id}");
        Ok(removed)
    }

    /// Interrupt the running cell. Only Kernel Gateway kernels support this.
    pub async fn interrupt(&self, id: &str) -> KernelResult<()> {
        let kernel = self.resolve(id).await?;
        if kernel.kernel_type() != KernelType::Terminal {
            return Err(KernelError::InvalidInput(format!(
                "interrupt is only supported for terminal kernels, {id} is a {} kernel",
                kernel.kernel_type()
            )));
        }
        self.router.interrupt(&kernel).await?;
        Ok(())
    }

    /// Run code on a kernel through its execution queue.
    pub async fn execute(
        &self,
        id: &str,
        request: ExecutionRequest,
        scratch_dir: Option<PathBuf>,
    ) -> KernelResult<ExecutionResult> {
        let kernel = self.resolve(id).await?;
        if kernel.status == KernelStatus::Inactive {
            return Err(KernelError::InvalidInput(format!(
                "kernel {id} is inactive, start it first"
            )));
        }

        let scratch_dir = scratch_dir.unwrap_or_else(|| self.router.shared_scratch_dir());
        let result = self
            .router
            .execute_on_kernel(&kernel, request, scratch_dir)
            .await?;

        if let Some(gateway_id) = self.router.gateway_kernel_id(id) {
            let record = |kernel: &mut Kernel| {
                if let KernelBackend::Terminal {
                    ref mut gateway_kernel_id,
                    ..
                } = kernel.backend
                {
                    *gateway_kernel_id = Some(gateway_id.clone());
                }
            };
            if let Err(e) = self.registry.modify(id, record).await {
                debug!("kernel {id} vanished during execution: {e}");
            }
        }

        Ok(result)
    }
}
