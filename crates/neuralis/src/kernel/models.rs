//! Kernel data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::KernelError;
use crate::container::PortMapping;
use crate::validate::{self, ValidationResult};

/// Kernel backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    Conda,
    Docker,
    Terminal,
}

impl KernelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelType::Conda => "conda",
            KernelType::Docker => "docker",
            KernelType::Terminal => "terminal",
        }
    }

    /// Registry id for a backend resource of this type (`docker_<containerId>`).
    pub fn kernel_id(&self, suffix: &str) -> String {
        format!("{}_{}", self.as_str(), suffix)
    }
}

impl std::fmt::Display for KernelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KernelType {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conda" => Ok(KernelType::Conda),
            "docker" => Ok(KernelType::Docker),
            "terminal" => Ok(KernelType::Terminal),
            other => Err(KernelError::InvalidInput(format!(
                "unsupported kernel type '{other}' (expected conda, docker or terminal)"
            ))),
        }
    }
}

/// Kernel lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    Active,
    Inactive,
    Restarting,
}

/// Credentials for a remote Kernel Gateway. Secrets are accepted on input
/// and never serialized back out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

/// Backend-specific connection data, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KernelBackend {
    #[serde(rename_all = "camelCase")]
    Conda {
        environment: String,
        path: String,
        #[serde(default)]
        packages: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Docker {
        container_id: String,
        #[serde(default)]
        container_name: Option<String>,
        image: String,
        #[serde(default)]
        ports: Vec<PortMapping>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip_address: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Terminal {
        host: String,
        port: u16,
        connection_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<TerminalCredentials>,
        /// Kernel spec started on the gateway.
        kernel_name: String,
        /// Id of the kernel running on the gateway, once one was started.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gateway_kernel_id: Option<String>,
    },
}

impl KernelBackend {
    pub fn kernel_type(&self) -> KernelType {
        match self {
            KernelBackend::Conda { .. } => KernelType::Conda,
            KernelBackend::Docker { .. } => KernelType::Docker,
            KernelBackend::Terminal { .. } => KernelType::Terminal,
        }
    }
}

/// A kernel known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kernel {
    pub id: String,
    pub name: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    pub status: KernelStatus,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub backend: KernelBackend,
}

impl Kernel {
    pub fn kernel_type(&self) -> KernelType {
        self.backend.kernel_type()
    }

    pub fn is_active(&self) -> bool {
        self.status == KernelStatus::Active
    }
}

/// Guess the kernel language from a container image name.
pub fn language_for_image(image: &str) -> &'static str {
    if image.contains("python") || image.contains("neuralis-kernel") {
        "python"
    } else if image.contains("r-") {
        "r"
    } else {
        "unknown"
    }
}

/// Partial update applied by `PATCH /api/kernels/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelPatch {
    pub name: Option<String>,
    pub status: Option<KernelStatus>,
}

impl KernelPatch {
    pub fn apply(&self, kernel: &mut Kernel) {
        if let Some(ref name) = self.name {
            kernel.name = name.clone();
        }
        if let Some(status) = self.status {
            kernel.status = status;
        }
    }
}

/// A package list given either as `"numpy pandas"` or `["numpy", "pandas"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageList {
    Text(String),
    List(Vec<String>),
}

impl Default for PackageList {
    fn default() -> Self {
        PackageList::List(Vec::new())
    }
}

impl PackageList {
    pub fn into_validated(self) -> ValidationResult<Vec<String>> {
        match self {
            PackageList::Text(text) => validate::parse_package_list(&text),
            PackageList::List(list) => {
                let packages: Vec<String> = list
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
                validate::validate_packages(&packages)?;
                Ok(packages)
            }
        }
    }
}

/// Body of `POST /api/kernels/conda`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCondaKernel {
    pub name: String,
    pub python_version: Option<String>,
    #[serde(default)]
    pub packages: PackageList,
}

/// Body of `POST /api/kernels/docker`.
///
/// With `image` an existing image is run; without it a Kernel Gateway image
/// is built from `pythonVersion` and `packages` first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDockerKernel {
    pub name: Option<String>,
    pub image: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    pub python_version: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub packages: PackageList,
}

/// Body of `POST /api/kernels/terminal`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTerminalKernel {
    pub host: String,
    pub port: u16,
    pub name: Option<String>,
    pub credentials: Option<TerminalCredentials>,
    pub kernel_name: Option<String>,
    /// Attach to a kernel already running on the gateway instead of starting one.
    #[serde(default)]
    pub gateway_kernel_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn terminal_kernel() -> Kernel {
        Kernel {
            id: "terminal_abc".into(),
            name: "Terminal (gw:8888)".into(),
            language: "python".into(),
            python_version: None,
            status: KernelStatus::Active,
            created_at: Utc::now(),
            backend: KernelBackend::Terminal {
                host: "gw".into(),
                port: 8888,
                connection_id: "abc".into(),
                credentials: Some(TerminalCredentials {
                    username: Some("alice".into()),
                    token: Some("secret-token".into()),
                    password: Some("hunter2".into()),
                }),
                kernel_name: "python3".into(),
                gateway_kernel_id: None,
            },
        }
    }

    #[test]
    fn test_kernel_serialization_is_flat_and_tagged() {
        let value = serde_json::to_value(terminal_kernel()).unwrap();
        assert_eq!(value["type"], "terminal");
        assert_eq!(value["status"], "active");
        assert_eq!(value["connectionId"], "abc");
        assert_eq!(value["credentials"], json!({"username": "alice"}));
        assert!(!value.to_string().contains("secret-token"));
        assert!(!value.to_string().contains("hunter2"));
    }

    #[test]
    fn test_kernel_type_parsing() {
        assert_eq!("docker".parse::<KernelType>().unwrap(), KernelType::Docker);
        assert!(matches!(
            "kubernetes".parse::<KernelType>(),
            Err(KernelError::InvalidInput(_))
        ));
        assert_eq!(KernelType::Conda.kernel_id("ds"), "conda_ds");
    }

    #[test]
    fn test_language_for_image() {
        assert_eq!(language_for_image("python:3.11-slim"), "python");
        assert_eq!(language_for_image("neuralis-kernel-image-3.9"), "python");
        assert_eq!(language_for_image("rocker/r-ver:4"), "r");
        assert_eq!(language_for_image("nginx"), "unknown");
    }

    #[test]
    fn test_package_list_forms() {
        let text: PackageList = serde_json::from_value(json!("numpy  pandas")).unwrap();
        assert_eq!(text.into_validated().unwrap(), vec!["numpy", "pandas"]);

        let list: PackageList = serde_json::from_value(json!(["scipy", " "])).unwrap();
        assert_eq!(list.into_validated().unwrap(), vec!["scipy"]);

        let bad: PackageList = serde_json::from_value(json!("numpy;rm")).unwrap();
        assert!(bad.into_validated().is_err());
    }

    #[test]
    fn test_patch_apply() {
        let mut kernel = terminal_kernel();
        KernelPatch {
            name: Some("renamed".into()),
            status: Some(KernelStatus::Inactive),
        }
        .apply(&mut kernel);
        assert_eq!(kernel.name, "renamed");
        assert_eq!(kernel.status, KernelStatus::Inactive);
    }
}
