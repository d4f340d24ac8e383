//! Kernel Gateway container provisioning.

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::container::{ContainerConfig, ContainerSummary, KernelContainer, PortMapping, local_url};
use super::dockerfile::{KernelImageSpec, render_dockerfile};
use super::error::{ContainerError, ContainerResult};
use super::DockerRuntime;
use crate::config::DockerConfig;
use crate::validate;

/// Parameters for [`ContainerService::build_kernel_container`]. Unset fields
/// fall back to the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    pub python_version: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub packages: Vec<String>,
}

/// A built and started kernel container plus the build log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub container: KernelContainer,
    pub output: String,
}

/// Builds Kernel Gateway containers and tracks the ones it started.
#[derive(Debug)]
pub struct ContainerService {
    docker: DockerRuntime,
    config: DockerConfig,
    /// Containers started by this process, keyed by container name.
    registry: RwLock<HashMap<String, KernelContainer>>,
}

impl ContainerService {
    pub fn new(docker: DockerRuntime, config: DockerConfig) -> Self {
        Self {
            docker,
            config,
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn docker(&self) -> &DockerRuntime {
        &self.docker
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    /// Docker version string, or `DockerUnavailable`.
    pub async fn check(&self) -> ContainerResult<String> {
        self.docker.version().await
    }

    /// Image tag for a kernel image.
    ///
    /// Images with extra packages get the container name appended so two
    /// differently provisioned kernels on the same Python version do not
    /// overwrite each other's image.
    pub fn image_tag(&self, python_version: &str, name: &str, has_packages: bool) -> String {
        let base = format!("{}-{}", self.config.image_prefix, python_version);
        if has_packages {
            format!("{base}-{name}").to_lowercase()
        } else {
            base.to_lowercase()
        }
    }

    /// Generate a Dockerfile, build it, replace any container with the same
    /// name and start the new one publishing `port:port`.
    pub async fn build_kernel_container(
        &self,
        request: BuildRequest,
    ) -> ContainerResult<BuildOutcome> {
        let python_version = request
            .python_version
            .unwrap_or_else(|| self.config.default_python_version.clone());
        let port = request.port.unwrap_or(self.config.default_port);
        let name = request
            .name
            .unwrap_or_else(|| format!("{}-{}", self.config.container_prefix, python_version));

        let spec = KernelImageSpec {
            python_version: python_version.clone(),
            port,
            packages: request.packages,
            base_packages: self.config.base_packages.clone(),
        };
        spec.validate()?;
        validate::validate_container_name(&name)?;

        let image = self.image_tag(&python_version, &name, !spec.packages.is_empty());
        info!("building kernel image {image} for container {name} (python {python_version}, port {port})");

        let build_dir = tempfile::Builder::new().prefix("neuralis-build-").tempdir()?;
        tokio::fs::write(build_dir.path().join("Dockerfile"), render_dockerfile(&spec)).await?;
        let mut output = self.docker.build_image(&image, build_dir.path()).await?;

        if self.docker.container_exists(&name).await? {
            info!("removing existing container {name}");
            if let Err(e) = self.docker.stop_container(&name).await {
                warn!("failed to stop existing container {name}: {e}");
            }
            self.docker.remove_container(&name, true).await?;
        }

        let run = ContainerConfig::new(&image)
            .name(&name)
            .port(PortMapping::same(port));
        let id = self.docker.run_container(&run).await?;
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("Started container {name} ({id}) on port {port}\n"));

        let container = KernelContainer {
            id,
            name: name.clone(),
            python_version,
            port,
            url: local_url(port),
            image,
            status: "running".to_string(),
            created_at: Utc::now(),
        };
        self.registry.write().await.insert(name, container.clone());

        Ok(BuildOutcome { container, output })
    }

    /// Running kernel containers (name filter on the configured prefix).
    pub async fn list(&self) -> ContainerResult<Vec<ContainerSummary>> {
        let summaries = self.docker.list_by_name(&self.config.container_prefix).await?;

        let mut registry = self.registry.write().await;
        for summary in &summaries {
            if let Some(entry) = registry.get_mut(&summary.name) {
                entry.status = summary.status.clone();
            }
        }

        Ok(summaries)
    }

    pub async fn get(&self, name: &str) -> Option<KernelContainer> {
        self.registry.read().await.get(name).cloned()
    }

    pub async fn registered(&self) -> Vec<KernelContainer> {
        let mut containers: Vec<KernelContainer> =
            self.registry.read().await.values().cloned().collect();
        containers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        containers
    }

    /// Remove the registry entry, then `docker stop` and `docker rm`.
    ///
    /// The registry removal happens first and is idempotent: a second call
    /// returns `Ok(None)` from the registry side and only reports whatever
    /// docker says about the already-removed container.
    pub async fn stop(&self, name: &str) -> ContainerResult<Option<KernelContainer>> {
        validate::validate_container_ref(name)?;
        let removed = self.registry.write().await.remove(name);
        if removed.is_none() {
            info!("container {name} was not in the registry");
        }

        self.docker.stop_container(name).await?;
        self.docker.remove_container(name, false).await?;
        info!("stopped and removed container {name}");
        Ok(removed)
    }

    pub async fn restart(&self, name: &str) -> ContainerResult<()> {
        self.docker.restart_container(name).await?;
        if let Some(entry) = self.registry.write().await.get_mut(name) {
            entry.status = "running".to_string();
        }
        Ok(())
    }

    pub async fn logs(&self, name: &str, tail: Option<u32>) -> ContainerResult<String> {
        self.docker
            .logs(name, tail.unwrap_or(self.config.log_tail))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records invocations and answers by docker subcommand.
    #[derive(Default)]
    struct ScriptedDocker {
        calls: Mutex<Vec<Vec<String>>>,
        dockerfiles: Mutex<Vec<String>>,
        ps_all: Mutex<String>,
        fail_stop: bool,
    }

    #[async_trait]
    impl CommandRunner for ScriptedDocker {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push(spec.args.clone());
            let ok = |stdout: &str| CommandOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            };
            let output = match spec.subcommand() {
                "build" => {
                    let dir = std::path::PathBuf::from(spec.args.last().unwrap());
                    let text = std::fs::read_to_string(dir.join("Dockerfile")).unwrap();
                    self.dockerfiles.lock().unwrap().push(text);
                    ok("Step 1/6 : FROM python:3.9-slim\nSuccessfully built abc\n")
                }
                "ps" => ok(self.ps_all.lock().unwrap().as_str()),
                "run" => ok("c0ffee\n"),
                "stop" if self.fail_stop => CommandOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "Error response from daemon: No such container: gone\n".into(),
                },
                _ => ok(""),
            };
            Ok(output)
        }
    }

    fn service(runner: Arc<ScriptedDocker>) -> ContainerService {
        ContainerService::new(
            DockerRuntime::new("docker", runner),
            DockerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_build_kernel_container_defaults() {
        let runner = Arc::new(ScriptedDocker::default());
        let svc = service(runner.clone());

        let outcome = svc.build_kernel_container(BuildRequest::default()).await.unwrap();
        assert_eq!(outcome.container.name, "neuralis-kernel-3.9");
        assert_eq!(outcome.container.port, 8888);
        assert_eq!(outcome.container.url, "http://localhost:8888");
        assert_eq!(outcome.container.id, "c0ffee");
        assert_eq!(outcome.container.image, "neuralis-kernel-image-3.9");
        assert!(outcome.output.contains("Successfully built abc"));

        let dockerfiles = runner.dockerfiles.lock().unwrap();
        assert!(dockerfiles[0].starts_with("FROM python:3.9-slim"));

        let calls = runner.calls.lock().unwrap();
        let run = calls.iter().find(|c| c[0] == "run").unwrap();
        assert_eq!(
            run,
            &vec![
                "run",
                "-d",
                "--name",
                "neuralis-kernel-3.9",
                "-p",
                "8888:8888",
                "neuralis-kernel-image-3.9"
            ]
        );
        assert!(svc.get("neuralis-kernel-3.9").await.is_some());
    }

    #[tokio::test]
    async fn test_build_replaces_existing_container() {
        let runner = Arc::new(ScriptedDocker::default());
        *runner.ps_all.lock().unwrap() = "dup\n".to_string();
        let svc = service(runner.clone());

        svc.build_kernel_container(BuildRequest {
            name: Some("dup".into()),
            packages: vec!["requests".into()],
            ..Default::default()
        })
        .await
        .unwrap();

        let calls = runner.calls.lock().unwrap();
        let subcommands: Vec<&str> = calls.iter().map(|c| c[0].as_str()).collect();
        assert_eq!(subcommands, vec!["build", "ps", "stop", "rm", "run"]);
        assert_eq!(calls[3], vec!["rm", "-f", "dup"]);
        let build = &calls[0];
        assert_eq!(build[2], "neuralis-kernel-image-3.9-dup");
    }

    #[tokio::test]
    async fn test_build_rejects_untrusted_inputs() {
        let runner = Arc::new(ScriptedDocker::default());
        let svc = service(runner.clone());

        for request in [
            BuildRequest {
                name: Some("x; rm -rf /".into()),
                ..Default::default()
            },
            BuildRequest {
                python_version: Some("3.9 && curl".into()),
                ..Default::default()
            },
            BuildRequest {
                packages: vec!["numpy|sh".into()],
                ..Default::default()
            },
            BuildRequest {
                port: Some(0),
                ..Default::default()
            },
        ] {
            let err = svc.build_kernel_container(request).await.unwrap_err();
            assert!(matches!(err, ContainerError::InvalidInput(_)));
        }
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_in_registry() {
        let runner = Arc::new(ScriptedDocker::default());
        let svc = service(runner.clone());
        svc.build_kernel_container(BuildRequest {
            name: Some("k1".into()),
            ..Default::default()
        })
        .await
        .unwrap();

        let first = svc.stop("k1").await.unwrap();
        assert!(first.is_some());
        let second = svc.stop("k1").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_stop_reports_docker_failure() {
        let runner = Arc::new(ScriptedDocker {
            fail_stop: true,
            ..Default::default()
        });
        let svc = service(runner);

        let err = svc.stop("gone").await.unwrap_err();
        assert!(matches!(err, ContainerError::ContainerNotFound(ref name) if name == "gone"));
    }

    #[tokio::test]
    async fn test_logs_uses_default_tail() {
        let runner = Arc::new(ScriptedDocker::default());
        let svc = service(runner.clone());
        svc.logs("k1", None).await.unwrap();
        svc.logs("k1", Some(5)).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0], vec!["logs", "--tail", "100", "k1"]);
        assert_eq!(calls[1], vec!["logs", "--tail", "5", "k1"]);
    }
}
