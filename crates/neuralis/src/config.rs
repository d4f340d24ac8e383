//! Application configuration.
//!
//! Loaded by the binary from `config.toml` plus `NEURALIS__*` environment
//! overrides; every section has defaults so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub docker: DockerConfig,
    pub conda: CondaConfig,
    pub execution: ExecutionConfig,
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl LoggingConfig {
    /// Open `file` for appending, creating parent directories. `None` when
    /// no log file is configured.
    pub fn open_file(&self) -> std::io::Result<Option<std::fs::File>> {
        let Some(ref file) = self.file else {
            return Ok(None);
        };
        let path = PathBuf::from(file);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map(Some)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_origins: Vec::new(),
        }
    }
}

/// Docker provisioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker binary (name on PATH or absolute path).
    pub binary: String,
    /// Name prefix shared by every kernel container; used as the `docker ps` filter.
    pub container_prefix: String,
    /// Tag prefix for built Kernel Gateway images.
    pub image_prefix: String,
    pub default_python_version: String,
    pub default_port: u16,
    /// Default number of lines returned by the logs endpoint.
    pub log_tail: u32,
    /// Packages installed into every built image after the requested ones.
    pub base_packages: Vec<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            container_prefix: "neuralis-kernel".to_string(),
            image_prefix: "neuralis-kernel-image".to_string(),
            default_python_version: "3.9".to_string(),
            default_port: 8888,
            log_tail: 100,
            base_packages: ["numpy", "pandas", "matplotlib", "seaborn", "scikit-learn"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CondaConfig {
    pub binary: String,
}

impl Default for CondaConfig {
    fn default() -> Self {
        Self {
            binary: "conda".to_string(),
        }
    }
}

/// Code execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Interpreter used for sessions without a bound kernel.
    pub python_binary: String,
    /// Root for session scratch directories. Defaults to
    /// `<tmp>/neuralis-python-sessions`.
    pub temp_root: Option<String>,
    /// Upper bound for one Kernel Gateway execution.
    pub gateway_timeout_secs: u64,
    /// Upper bound for one interpreter process. Unset means no limit.
    pub process_timeout_secs: Option<u64>,
    /// Kernel spec requested when starting a kernel on a gateway.
    pub gateway_kernel_name: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            python_binary: "python".to_string(),
            temp_root: None,
            gateway_timeout_secs: 300,
            process_timeout_secs: None,
            gateway_kernel_name: "python3".to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn temp_root_path(&self) -> PathBuf {
        match self.temp_root {
            Some(ref root) => PathBuf::from(root),
            None => std::env::temp_dir().join("neuralis-python-sessions"),
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }
}

/// Amazon Q CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub binary: String,
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            binary: "q".to_string(),
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.docker.default_port, 8888);
        assert_eq!(config.docker.default_python_version, "3.9");
        assert_eq!(config.assistant.timeout_secs, 30);
        assert!(config.server.cors_origins.is_empty());
        assert!(
            config
                .execution
                .temp_root_path()
                .ends_with("neuralis-python-sessions")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 4000

            [docker]
            log_tail = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.docker.log_tail, 20);
        assert_eq!(config.docker.binary, "docker");
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        assert!(text.contains("[server]"));
        assert!(text.contains("port = 3001"));
    }

    #[test]
    fn test_log_file_is_opened_for_append() {
        assert!(LoggingConfig::default().open_file().unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("neuralis.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "earlier\n").unwrap();
        let logging = LoggingConfig {
            level: "info".into(),
            file: Some(path.display().to_string()),
        };

        use std::io::Write;
        let mut file = logging.open_file().unwrap().unwrap();
        file.write_all(b"later\n").unwrap();
        drop(file);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }

    #[test]
    fn test_log_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("server.log");
        let logging = LoggingConfig {
            level: "debug".into(),
            file: Some(path.display().to_string()),
        };
        assert!(logging.open_file().unwrap().is_some());
        assert!(path.exists());
    }
}
