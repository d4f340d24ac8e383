//! Container types and `docker ps` output parsing.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use super::error::{ContainerError, ContainerResult};
use crate::validate::{self, ValidationResult};

/// Published host port in a `docker ps` PORTS column.
static HOST_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"0\.0\.0\.0:(\d+)").expect("Invalid regex pattern for published port")
});

/// Port mapping configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortMapping {
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }

    /// Same port on both sides.
    pub fn same(port: u16) -> Self {
        Self::new(port, port)
    }

    /// Parse `8888` or `8888:8888`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.split_once(':') {
            Some((host, container)) => Some(Self::new(
                host.trim().parse().ok()?,
                container.trim().parse().ok()?,
            )),
            None => text.trim().parse().ok().map(Self::same),
        }
    }

    pub fn as_arg(&self) -> String {
        format!("{}:{}", self.host_port, self.container_port)
    }
}

/// Accepts `8888`, `"8888:8888"` or `{"hostPort": 8888, "containerPort": 8888}`.
impl<'de> Deserialize<'de> for PortMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, MapAccess, Visitor};
        use std::fmt;

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Object {
            host_port: u16,
            container_port: Option<u16>,
        }

        struct PortMappingVisitor;

        impl<'de> Visitor<'de> for PortMappingVisitor {
            type Value = PortMapping;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a port, a \"host:container\" string or a port mapping object")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u16::try_from(value)
                    .map(PortMapping::same)
                    .map_err(|_| E::custom(format!("port {value} out of range")))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u16::try_from(value)
                    .map(PortMapping::same)
                    .map_err(|_| E::custom(format!("port {value} out of range")))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                PortMapping::parse(value)
                    .ok_or_else(|| E::custom(format!("invalid port mapping '{value}'")))
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let object = Object::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(PortMapping::new(
                    object.host_port,
                    object.container_port.unwrap_or(object.host_port),
                ))
            }
        }

        deserializer.deserialize_any(PortMappingVisitor)
    }
}

/// Configuration for `docker run -d`.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub image: String,
    pub name: Option<String>,
    pub ports: Vec<PortMapping>,
    pub env: Vec<(String, String)>,
    pub command: Vec<String>,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.ports.push(mapping);
        self
    }

    pub fn ports(mut self, mappings: impl IntoIterator<Item = PortMapping>) -> Self {
        self.ports.extend(mappings);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Validate every value that becomes a `docker run` argument.
    pub fn validate(&self) -> ValidationResult {
        validate::validate_image_name(&self.image)?;
        if let Some(ref name) = self.name {
            validate::validate_container_name(name)?;
        }
        for mapping in &self.ports {
            validate::validate_port(mapping.host_port)?;
            validate::validate_port(mapping.container_port)?;
        }
        for (key, _) in &self.env {
            let valid = key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(validate::ValidationError::new(
                    "environment variable",
                    format!("'{key}' is not a valid variable name"),
                ));
            }
        }
        Ok(())
    }

    /// Arguments following the docker binary.
    pub fn run_args(&self) -> Vec<String> {
        let mut owned_args: Vec<String> = vec!["run".to_string(), "-d".to_string()];

        if let Some(ref name) = self.name {
            owned_args.push("--name".to_string());
            owned_args.push(name.clone());
        }

        for port in &self.ports {
            owned_args.push("-p".to_string());
            owned_args.push(port.as_arg());
        }

        for (key, value) in &self.env {
            owned_args.push("-e".to_string());
            owned_args.push(format!("{key}={value}"));
        }

        owned_args.push(self.image.clone());
        owned_args.extend(self.command.iter().cloned());
        owned_args
    }
}

/// A running kernel container as reported by `docker ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub name: String,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub status: String,
}

/// Any container as reported by `docker ps -a`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Raw STATUS column (`Up 5 minutes`, `Exited (0) 2 hours ago`).
    pub status: String,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.status.starts_with("Up")
    }
}

/// A kernel container provisioned by this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelContainer {
    pub id: String,
    pub name: String,
    pub python_version: String,
    pub port: u16,
    pub url: String,
    pub image: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Extract the published host port from a PORTS column.
///
/// `0.0.0.0:8888->8888/tcp, :::8888->8888/tcp` yields `Some(8888)`; a column
/// without an IPv4 wildcard binding yields `None`.
pub fn parse_host_port(ports: &str) -> Option<u16> {
    HOST_PORT
        .captures(ports)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn local_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Parse one `{{.Names}}|{{.Ports}}` line.
pub fn parse_summary_line(line: &str) -> ContainerResult<ContainerSummary> {
    let (name, ports) = line
        .split_once('|')
        .ok_or_else(|| ContainerError::ParseError(format!("expected 'name|ports', got '{line}'")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ContainerError::ParseError(format!(
            "missing container name in '{line}'"
        )));
    }

    let port = parse_host_port(ports);
    Ok(ContainerSummary {
        name: name.to_string(),
        port,
        url: port.map(local_url),
        status: "running".to_string(),
    })
}

/// Parse `docker ps --format {{.Names}}|{{.Ports}}` output.
pub fn parse_summaries(stdout: &str) -> ContainerResult<Vec<ContainerSummary>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_summary_line)
        .collect()
}

/// Parse `docker ps -a --format {{.ID}}|{{.Names}}|{{.Image}}|{{.Status}}` output.
pub fn parse_records(stdout: &str) -> ContainerResult<Vec<ContainerRecord>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.splitn(4, '|').collect();
            match fields.as_slice() {
                [id, name, image, status] if !id.trim().is_empty() => Ok(ContainerRecord {
                    id: id.trim().to_string(),
                    name: name.trim().to_string(),
                    image: image.trim().to_string(),
                    status: status.trim().to_string(),
                }),
                _ => Err(ContainerError::ParseError(format!(
                    "expected 'id|name|image|status', got '{line}'"
                ))),
            }
        })
        .collect()
}
