//! Conda environment provisioning.

mod error;

pub use error::{CondaError, CondaResult};

use futures::future::join_all;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::validate;

/// One line of `conda info --envs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaEnvInfo {
    pub name: String,
    pub path: String,
    pub active: bool,
}

/// A discovered or created environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CondaEnv {
    pub name: String,
    pub path: String,
    pub python_version: Option<String>,
    pub packages: Vec<String>,
}

/// Parse `conda info --envs` output.
///
/// Comment lines are skipped, `*` marks the active environment, and
/// unnamed environments (a bare path) are ignored since `conda run -n`
/// cannot address them.
pub fn parse_env_list(stdout: &str) -> CondaResult<Vec<CondaEnvInfo>> {
    let mut envs = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let env = match fields.as_slice() {
            [name, "*", path] => CondaEnvInfo {
                name: name.to_string(),
                path: path.to_string(),
                active: true,
            },
            [name, path] if !name.starts_with('/') => CondaEnvInfo {
                name: name.to_string(),
                path: path.to_string(),
                active: false,
            },
            [path] if path.starts_with('/') => continue,
            _ => {
                return Err(CondaError::ParseError(format!(
                    "unexpected environment line '{line}'"
                )));
            }
        };
        envs.push(env);
    }
    Ok(envs)
}

/// Extract `3.9.18` from `Python 3.9.18`.
pub fn parse_python_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .skip_while(|word| !word.eq_ignore_ascii_case("python"))
        .nth(1)
        .map(String::from)
}

/// Conda CLI client.
#[derive(Clone)]
pub struct CondaRuntime {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for CondaRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CondaRuntime")
            .field("binary", &self.binary)
            .finish()
    }
}

impl CondaRuntime {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.binary)
    }

    async fn exec(&self, spec: CommandSpec) -> CondaResult<CommandOutput> {
        let command = spec.subcommand().to_string();
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| CondaError::from_command(&command, e))?;

        if !output.success() {
            return Err(CondaError::CommandFailed {
                command,
                message: output.failure_message(),
            });
        }
        Ok(output)
    }

    pub async fn version(&self) -> CondaResult<String> {
        match self.exec(self.command().arg("--version")).await {
            Ok(output) => Ok(output.stdout.trim().to_string()),
            Err(e) => Err(CondaError::CondaUnavailable(e.to_string())),
        }
    }

    /// `conda create`, optional `conda install`, then look up the install path.
    pub async fn create_env(
        &self,
        name: &str,
        python_version: &str,
        packages: &[String],
    ) -> CondaResult<CondaEnv> {
        validate::validate_env_name(name)?;
        validate::validate_python_version(python_version)?;
        validate::validate_packages(packages)?;

        info!("creating conda environment {name} with python {python_version}");
        self.exec(self.command().args([
            "create".to_string(),
            "-y".to_string(),
            "-n".to_string(),
            name.to_string(),
            format!("python={python_version}"),
        ]))
        .await?;

        if !packages.is_empty() {
            info!("installing {} package(s) into {name}", packages.len());
            self.exec(
                self.command()
                    .args(["install", "-y", "-n", name])
                    .args(packages.iter().cloned()),
            )
            .await?;
        }

        let path = self.env_path(name).await?;
        Ok(CondaEnv {
            name: name.to_string(),
            path,
            python_version: Some(python_version.to_string()),
            packages: packages.to_vec(),
        })
    }

    pub async fn list_envs(&self) -> CondaResult<Vec<CondaEnvInfo>> {
        let output = self.exec(self.command().args(["info", "--envs"])).await?;
        parse_env_list(&output.stdout)
    }

    /// Every named environment with its Python version, looked up concurrently.
    pub async fn discover(&self) -> CondaResult<Vec<CondaEnv>> {
        let envs = self.list_envs().await?;
        let versions = join_all(envs.iter().map(|env| self.python_version(&env.name))).await;

        Ok(envs
            .into_iter()
            .zip(versions)
            .map(|(env, version)| CondaEnv {
                name: env.name,
                path: env.path,
                python_version: version,
                packages: Vec::new(),
            })
            .collect())
    }

    pub async fn env_path(&self, name: &str) -> CondaResult<String> {
        self.list_envs()
            .await?
            .into_iter()
            .find(|env| env.name == name)
            .map(|env| env.path)
            .ok_or_else(|| CondaError::EnvironmentNotFound(name.to_string()))
    }

    /// Python version inside an environment; `None` when it cannot be determined.
    pub async fn python_version(&self, name: &str) -> Option<String> {
        let spec = self
            .command()
            .args(["run", "-n", name, "python", "--version"]);
        match self.exec(spec).await {
            // Python 2 prints its version on stderr.
            Ok(output) => parse_python_version(&output.stdout)
                .or_else(|| parse_python_version(&output.stderr)),
            Err(e) => {
                debug!("could not determine python version for {name}: {e}");
                None
            }
        }
    }

    /// Command that runs a script file with an environment's interpreter.
    pub fn python_command(&self, env: &str, script: &str) -> CondaResult<CommandSpec> {
        validate::validate_env_name(env)?;
        Ok(self
            .command()
            .args(["run", "-n", env, "python", script]))
    }
}
