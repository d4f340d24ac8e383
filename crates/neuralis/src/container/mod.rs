//! Docker provisioning.
//!
//! [`DockerRuntime`] wraps the docker CLI one subcommand at a time;
//! [`ContainerService`] builds Kernel Gateway images on top of it and keeps
//! the registry of containers this process started.

mod container;
mod dockerfile;
mod error;
mod service;

pub use container::{
    ContainerConfig, ContainerRecord, ContainerSummary, KernelContainer, PortMapping, local_url,
    parse_host_port, parse_records, parse_summaries, parse_summary_line,
};
pub use dockerfile::{GATEWAY_PACKAGES, KernelImageSpec, render_build_script, render_dockerfile};
pub use error::{ContainerError, ContainerResult};
pub use service::{BuildOutcome, BuildRequest, ContainerService};

use log::debug;
use std::path::Path;
use std::sync::Arc;

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::validate::validate_container_ref;

/// Docker CLI client.
#[derive(Clone)]
pub struct DockerRuntime {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime")
            .field("binary", &self.binary)
            .finish()
    }
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary)
    }

    /// Run a docker command and fail on a non-zero exit.
    async fn exec(&self, spec: CommandSpec) -> ContainerResult<CommandOutput> {
        let command = spec.subcommand().to_string();
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| ContainerError::from_command(&command, e))?;

        if !output.success() {
            let message = output.failure_message();
            if message.contains("No such container") {
                let target = spec.args.last().cloned().unwrap_or_default();
                return Err(ContainerError::ContainerNotFound(target));
            }
            return Err(ContainerError::CommandFailed { command, message });
        }

        Ok(output)
    }

    /// `docker --version`. Any failure means docker is unusable.
    pub async fn version(&self) -> ContainerResult<String> {
        match self.exec(self.command().arg("--version")).await {
            Ok(output) => Ok(output.stdout.trim().to_string()),
            Err(e) => Err(ContainerError::DockerUnavailable(e.to_string())),
        }
    }

    /// Build an image from a context directory; returns the build log.
    pub async fn build_image(&self, tag: &str, context_dir: &Path) -> ContainerResult<String> {
        crate::validate::validate_image_name(tag)?;
        let spec = self
            .command()
            .args(["build", "-t", tag])
            .arg(context_dir.display().to_string());
        let output = self.exec(spec).await?;
        Ok(output.combined())
    }

    /// `docker run -d`; returns the new container id.
    pub async fn run_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;
        let output = self.exec(self.command().args(config.run_args())).await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn start_container(&self, id_or_name: &str) -> ContainerResult<()> {
        validate_container_ref(id_or_name)?;
        self.exec(self.command().args(["start", id_or_name])).await?;
        Ok(())
    }

    pub async fn stop_container(&self, id_or_name: &str) -> ContainerResult<()> {
        validate_container_ref(id_or_name)?;
        self.exec(self.command().args(["stop", id_or_name])).await?;
        Ok(())
    }

    pub async fn restart_container(&self, id_or_name: &str) -> ContainerResult<()> {
        validate_container_ref(id_or_name)?;
        self.exec(self.command().args(["restart", id_or_name])).await?;
        Ok(())
    }

    pub async fn remove_container(&self, id_or_name: &str, force: bool) -> ContainerResult<()> {
        validate_container_ref(id_or_name)?;
        let mut spec = self.command().arg("rm");
        if force {
            spec = spec.arg("-f");
        }
        self.exec(spec.arg(id_or_name)).await?;
        Ok(())
    }

    /// Last `tail` lines of container output, stdout then stderr.
    pub async fn logs(&self, id_or_name: &str, tail: u32) -> ContainerResult<String> {
        validate_container_ref(id_or_name)?;
        let spec = self
            .command()
            .args(["logs", "--tail", tail.to_string().as_str(), id_or_name]);
        let output = self.exec(spec).await?;
        Ok(output.combined())
    }

    /// Whether a container with exactly this name exists (running or not).
    pub async fn container_exists(&self, name: &str) -> ContainerResult<bool> {
        validate_container_ref(name)?;
        let filter = format!("name=^/{name}$");
        let output = self
            .exec(
                self.command()
                    .args(["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"]),
            )
            .await?;
        Ok(output.stdout.lines().any(|line| line.trim() == name))
    }

    /// Running containers whose name matches `prefix`.
    pub async fn list_by_name(&self, prefix: &str) -> ContainerResult<Vec<ContainerSummary>> {
        let filter = format!("name={prefix}");
        let output = self
            .exec(self.command().args([
                "ps",
                "--filter",
                filter.as_str(),
                "--format",
                "{{.Names}}|{{.Ports}}",
            ]))
            .await?;
        parse_summaries(&output.stdout)
    }

    /// Every container, running or not.
    pub async fn list_all(&self) -> ContainerResult<Vec<ContainerRecord>> {
        let output = self
            .exec(self.command().args([
                "ps",
                "-a",
                "--format",
                "{{.ID}}|{{.Names}}|{{.Image}}|{{.Status}}",
            ]))
            .await?;
        parse_records(&output.stdout)
    }

    /// First network IP address of a container, if it has one.
    pub async fn inspect_ip(&self, id_or_name: &str) -> ContainerResult<Option<String>> {
        validate_container_ref(id_or_name)?;
        let output = self
            .exec(self.command().args([
                "inspect",
                "-f",
                "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}",
                id_or_name,
            ]))
            .await?;
        let ip = output.stdout.split_whitespace().next().map(String::from);
        debug!("container {id_or_name} ip: {ip:?}");
        Ok(ip)
    }

    /// Command that runs a Python script read from stdin inside a container.
    pub fn python_exec_command(
        &self,
        id_or_name: &str,
        script: String,
    ) -> ContainerResult<CommandSpec> {
        validate_container_ref(id_or_name)?;
        Ok(self
            .command()
            .args(["exec", "-i", id_or_name, "python", "-"])
            .stdin(script))
    }
}
