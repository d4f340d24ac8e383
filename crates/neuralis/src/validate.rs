//! Allow-list validation for values that end up in command arguments.
//!
//! Nothing is passed through a shell, but names, versions and package specs
//! still become arguments to docker/conda/pip and lines of a generated
//! Dockerfile, so each one is checked against a strict pattern first.

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use thiserror::Error;

/// A rejected input value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub type ValidationResult<T = ()> = Result<T, ValidationError>;

static PYTHON_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+(\.[0-9]+){0,2}$").expect("Invalid regex pattern for python version")
});

/// `name[extras]` optionally followed by pip/conda version specifiers.
static PACKAGE_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9._-]*(\[[A-Za-z0-9._,-]+\])?((==|>=|<=|!=|~=|>|<|=)[A-Za-z0-9.*+!_-]+(,(==|>=|<=|!=|~=|>|<)[A-Za-z0-9.*+!_-]+)*)?$",
    )
    .expect("Invalid regex pattern for package spec")
});

/// Validate a Python version such as `3`, `3.11` or `3.11.4`.
pub fn validate_python_version(version: &str) -> ValidationResult {
    if !PYTHON_VERSION.is_match(version) {
        return Err(ValidationError::new(
            "python version",
            format!("'{version}' must look like 3, 3.11 or 3.11.4"),
        ));
    }
    Ok(())
}

pub fn validate_port(port: u16) -> ValidationResult {
    if port == 0 {
        return Err(ValidationError::new(
            "port",
            "must be between 1 and 65535",
        ));
    }
    Ok(())
}

/// Validate a container name.
///
/// Docker accepts `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
pub fn validate_container_name(name: &str) -> ValidationResult {
    validate_identifier("container name", name, 128, &['-', '_', '.'])
}

/// Validate a container id or name passed to stop/rm/logs/exec.
pub fn validate_container_ref(id: &str) -> ValidationResult {
    validate_identifier("container id or name", id, 128, &['-', '_', '.'])
}

/// Validate a conda environment name.
pub fn validate_env_name(name: &str) -> ValidationResult {
    validate_identifier("environment name", name, 64, &['-', '_', '.'])
}

/// Validate an id that is interpolated into a Kernel Gateway URL path.
pub fn validate_gateway_kernel_id(id: &str) -> ValidationResult {
    validate_identifier("gateway kernel id", id, 128, &['-', '_'])
}

fn validate_identifier(
    field: &'static str,
    value: &str,
    max_len: usize,
    extra: &[char],
) -> ValidationResult {
    let Some(first) = value.chars().next() else {
        return Err(ValidationError::new(field, "cannot be empty"));
    };

    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("exceeds maximum length of {max_len} characters"),
        ));
    }

    if !first.is_ascii_alphanumeric() {
        return Err(ValidationError::new(
            field,
            format!("'{value}' must start with an alphanumeric character"),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || extra.contains(&c);
    if !value.chars().all(valid_chars) {
        return Err(ValidationError::new(
            field,
            format!("'{value}' contains invalid characters"),
        ));
    }

    Ok(())
}

/// Validate an image reference: `[registry/][namespace/]name[:tag][@digest]`.
pub fn validate_image_name(image: &str) -> ValidationResult {
    if image.is_empty() {
        return Err(ValidationError::new("image name", "cannot be empty"));
    }

    if image.len() > 256 {
        return Err(ValidationError::new(
            "image name",
            "exceeds maximum length of 256 characters",
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };

    if !image.chars().all(valid_chars) {
        return Err(ValidationError::new(
            "image name",
            format!(
                "'{image}' contains invalid characters; only alphanumeric, '.', '-', '_', '/', ':', '@' are allowed"
            ),
        ));
    }

    if image.contains("..") || image.starts_with('-') {
        return Err(ValidationError::new(
            "image name",
            format!("'{image}' is not a valid image reference"),
        ));
    }

    Ok(())
}

/// Validate one pip/conda package spec (`numpy`, `pandas==2.1`, `requests[socks]>=2,<3`).
pub fn validate_package(spec: &str) -> ValidationResult {
    if spec.len() > 200 {
        return Err(ValidationError::new(
            "package",
            "exceeds maximum length of 200 characters",
        ));
    }
    if !PACKAGE_SPEC.is_match(spec) {
        return Err(ValidationError::new(
            "package",
            format!("'{spec}' is not a valid package specification"),
        ));
    }
    Ok(())
}

pub fn validate_packages(specs: &[String]) -> ValidationResult {
    specs.iter().try_for_each(|spec| validate_package(spec))
}

/// Split a whitespace separated package list and validate each entry.
pub fn parse_package_list(text: &str) -> ValidationResult<Vec<String>> {
    let packages: Vec<String> = text.split_whitespace().map(String::from).collect();
    validate_packages(&packages)?;
    Ok(packages)
}

/// Validate a host name (RFC 1123) or IP address.
pub fn validate_host(host: &str) -> ValidationResult {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    if host.is_empty() {
        return Err(ValidationError::new("host", "cannot be empty"));
    }

    if host.len() > 253 {
        return Err(ValidationError::new(
            "host",
            "exceeds maximum length of 253 characters",
        ));
    }

    for label in host.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ValidationError::new(
                "host",
                format!("'{host}' has an empty or oversized label"),
            ));
        }

        let starts_ok = label.starts_with(|c: char| c.is_ascii_alphanumeric());
        let ends_ok = label.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !starts_ok || !ends_ok {
            return Err(ValidationError::new(
                "host",
                "labels must start and end with alphanumeric characters",
            ));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::new(
                "host",
                format!("'{host}' contains invalid characters"),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_version() {
        assert!(validate_python_version("3").is_ok());
        assert!(validate_python_version("3.9").is_ok());
        assert!(validate_python_version("3.11.4").is_ok());
        assert!(validate_python_version("").is_err());
        assert!(validate_python_version("3.9-slim").is_err());
        assert!(validate_python_version("3.9; rm -rf /").is_err());
        assert!(validate_python_version("3.9.1.2").is_err());
    }

    #[test]
    fn test_port() {
        assert!(validate_port(8888).is_ok());
        assert!(validate_port(0).is_err());
    }

    #[test]
    fn test_container_name() {
        assert!(validate_container_name("test-kernel").is_ok());
        assert!(validate_container_name("neuralis-kernel-3.9").is_ok());
        assert!(validate_container_name("kernel_1").is_ok());
        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("-rm").is_err());
        assert!(validate_container_name(".hidden").is_err());
        assert!(validate_container_name("a b").is_err());
        assert!(validate_container_name("x;reboot").is_err());
        assert!(validate_container_name("$(whoami)").is_err());
        assert!(validate_container_name(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_image_name() {
        assert!(validate_image_name("python:3.9-slim").is_ok());
        assert!(validate_image_name("neuralis-kernel-image-3.9").is_ok());
        assert!(validate_image_name("ghcr.io/org/image@sha256:abc123").is_ok());
        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("image with spaces").is_err());
        assert!(validate_image_name("image`id`").is_err());
        assert!(validate_image_name("../../etc/passwd").is_err());
        assert!(validate_image_name("--privileged").is_err());
    }

    #[test]
    fn test_package_specs() {
        for ok in [
            "numpy",
            "scikit-learn",
            "pandas==2.1.0",
            "requests[socks]>=2.0,<3",
            "python-dateutil~=2.8",
            "tensorflow=2.12",
            "zope.interface",
        ] {
            assert!(validate_package(ok).is_ok(), "{ok} should be accepted");
        }
        for bad in [
            "",
            "numpy;rm -rf /",
            "pandas && curl x",
            "x|y",
            "a>b<c>",
            "--index-url=http://evil",
            "pkg$(id)",
            "-e.",
        ] {
            assert!(validate_package(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_parse_package_list() {
        assert_eq!(
            parse_package_list("  numpy   pandas==2.1 ").unwrap(),
            vec!["numpy".to_string(), "pandas==2.1".to_string()]
        );
        assert!(parse_package_list("").unwrap().is_empty());
        assert!(parse_package_list("numpy; rm -rf /").is_err());
    }

    #[test]
    fn test_host() {
        assert!(validate_host("localhost").is_ok());
        assert!(validate_host("gateway.example.com").is_ok());
        assert!(validate_host("10.0.0.5").is_ok());
        assert!(validate_host("::1").is_ok());
        assert!(validate_host("").is_err());
        assert!(validate_host("-bad.example").is_err());
        assert!(validate_host("host name").is_err());
        assert!(validate_host("a..b").is_err());
    }

    #[test]
    fn test_env_and_gateway_ids() {
        assert!(validate_env_name("data-science").is_ok());
        assert!(validate_env_name("py3.11").is_ok());
        assert!(validate_env_name("../base").is_err());
        assert!(validate_gateway_kernel_id("8c1f0d4e-2f3a-4b6c-9d8e-123456789abc").is_ok());
        assert!(validate_gateway_kernel_id("../../api").is_err());
    }

    #[test]
    fn test_error_message_mentions_field() {
        let err = validate_port(0).unwrap_err();
        assert_eq!(err.to_string(), "invalid port: must be between 1 and 65535");
    }
}
