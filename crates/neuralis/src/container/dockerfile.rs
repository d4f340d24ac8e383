//! Kernel Gateway image templates.
//!
//! Renders the Dockerfile used by [`super::ContainerService`] and the
//! standalone build script exposed by `neuralis build-script`.

use crate::config::DockerConfig;
use crate::validate::{self, ValidationResult};

/// Packages every kernel image needs to serve the gateway protocol.
pub const GATEWAY_PACKAGES: &[&str] = &[
    "jupyter",
    "jupyterlab",
    "notebook",
    "jupyter-kernel-gateway",
];

/// Inputs for one kernel image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelImageSpec {
    pub python_version: String,
    pub port: u16,
    /// Requested extra packages.
    pub packages: Vec<String>,
    /// Common packages installed into every image.
    pub base_packages: Vec<String>,
}

impl KernelImageSpec {
    pub fn validate(&self) -> ValidationResult {
        validate::validate_python_version(&self.python_version)?;
        validate::validate_port(self.port)?;
        validate::validate_packages(&self.packages)?;
        validate::validate_packages(&self.base_packages)
    }

    pub fn base_image(&self) -> String {
        format!("python:{}-slim", self.python_version)
    }
}

fn pip_install(packages: &[String]) -> String {
    let mut argv = vec!["pip".to_string(), "install".to_string(), "--no-cache-dir".to_string()];
    argv.extend(packages.iter().cloned());
    // Exec form: the JSON array is passed to the runtime without a shell.
    let json = serde_json::to_string(&argv).unwrap_or_default();
    format!("RUN {json}\n")
}

/// Render the Dockerfile for a kernel image.
///
/// Callers run `KernelImageSpec::validate` first; values are never shell-interpreted
/// because package installs use the exec form.
pub fn render_dockerfile(spec: &KernelImageSpec) -> String {
    let gateway: Vec<String> = GATEWAY_PACKAGES.iter().map(|p| p.to_string()).collect();
    let port = spec.port;

    let mut out = String::new();
    out.push_str(&format!("FROM {}\n\n", spec.base_image()));
    out.push_str("ENV PYTHONUNBUFFERED=1\n\n");
    out.push_str("# Jupyter and the kernel gateway\n");
    out.push_str(&pip_install(&gateway));

    if !spec.packages.is_empty() {
        out.push_str("\n# Requested packages\n");
        out.push_str(&pip_install(&spec.packages));
    }

    if !spec.base_packages.is_empty() {
        out.push_str("\n# Common data science packages\n");
        out.push_str(&pip_install(&spec.base_packages));
    }

    out.push_str("\nWORKDIR /notebooks\n\n");
    out.push_str(&format!("EXPOSE {port}\n\n"));
    out.push_str(&format!(
        "CMD [\"jupyter\", \"kernelgateway\", \"--KernelGatewayApp.ip=0.0.0.0\", \"--KernelGatewayApp.port={port}\", \"--KernelGatewayApp.allow_origin=*\"]\n"
    ));
    out
}

/// Render a bash script performing the same build and run as the API.
///
/// Usage: `build_kernel.sh [--python-version V] [--port P] [--name N] [--packages "a b"]`
pub fn render_build_script(config: &DockerConfig) -> String {
    let base_packages = config.base_packages.join(" ");
    let gateway_packages = GATEWAY_PACKAGES.join(" ");

    format!(
        r#"#!/usr/bin/env bash
# Build and run a Neuralis Jupyter Kernel Gateway container.
set -euo pipefail

PYTHON_VERSION="{python_version}"
PORT="{port}"
CONTAINER_NAME=""
PACKAGES=""

usage() {{
  echo "Usage: $0 [--python-version VERSION] [--port PORT] [--name NAME] [--packages \"pkg1 pkg2\"]" >&2
  exit 1
}}

while [[ $# -gt 0 ]]; do
  case "$1" in
    --python-version) PYTHON_VERSION="${{2:?missing value for --python-version}}"; shift 2 ;;
    --port) PORT="${{2:?missing value for --port}}"; shift 2 ;;
    --name) CONTAINER_NAME="${{2:?missing value for --name}}"; shift 2 ;;
    --packages) PACKAGES="${{2:-}}"; shift 2 ;;
    -h|--help) usage ;;
    *) echo "Unknown option: $1" >&2; usage ;;
  esac
done

[[ "$PYTHON_VERSION" =~ ^[0-9]+(\.[0-9]+){{0,2}}$ ]] || {{ echo "Invalid python version: $PYTHON_VERSION" >&2; exit 1; }}
[[ "$PORT" =~ ^[0-9]+$ ]] && (( PORT >= 1 && PORT <= 65535 )) || {{ echo "Invalid port: $PORT" >&2; exit 1; }}
CONTAINER_NAME="${{CONTAINER_NAME:-{container_prefix}-$PYTHON_VERSION}}"
[[ "$CONTAINER_NAME" =~ ^[A-Za-z0-9][A-Za-z0-9_.-]*$ ]] || {{ echo "Invalid container name: $CONTAINER_NAME" >&2; exit 1; }}

EXTRA=()
for pkg in $PACKAGES; do
  [[ "$pkg" =~ ^[A-Za-z0-9][A-Za-z0-9._,=\<\>\!~\[\]-]*$ ]] || {{ echo "Invalid package: $pkg" >&2; exit 1; }}
  EXTRA+=("\"$pkg\"")
done

IMAGE_NAME="{image_prefix}-$PYTHON_VERSION"
if [[ ${{#EXTRA[@]}} -gt 0 ]]; then
  IMAGE_NAME="$IMAGE_NAME-$(echo "$CONTAINER_NAME" | tr '[:upper:]' '[:lower:]')"
fi

BUILD_DIR="$(mktemp -d)"
trap 'rm -rf "$BUILD_DIR"' EXIT

{{
  echo "FROM python:$PYTHON_VERSION-slim"
  echo ""
  echo "ENV PYTHONUNBUFFERED=1"
  echo "RUN pip install --no-cache-dir {gateway_packages}"
  if [[ ${{#EXTRA[@]}} -gt 0 ]]; then
    (IFS=,; echo "RUN [\"pip\", \"install\", \"--no-cache-dir\", ${{EXTRA[*]}}]")
  fi
  if [[ -n "{base_packages}" ]]; then
    echo "RUN pip install --no-cache-dir {base_packages}"
  fi
  echo "WORKDIR /notebooks"
  echo "EXPOSE $PORT"
  echo "CMD [\"jupyter\", \"kernelgateway\", \"--KernelGatewayApp.ip=0.0.0.0\", \"--KernelGatewayApp.port=$PORT\", \"--KernelGatewayApp.allow_origin=*\"]"
}} > "$BUILD_DIR/Dockerfile"

echo "Building image $IMAGE_NAME (python $PYTHON_VERSION)..."
{docker} build -t "$IMAGE_NAME" "$BUILD_DIR"

if [[ -n "$({docker} ps -aq --filter "name=^/$CONTAINER_NAME$")" ]]; then
  echo "Removing existing container $CONTAINER_NAME..."
  {docker} stop "$CONTAINER_NAME" >/dev/null 2>&1 || true
  {docker} rm "$CONTAINER_NAME" >/dev/null
fi

echo "Starting container $CONTAINER_NAME on port $PORT..."
{docker} run -d --name "$CONTAINER_NAME" -p "$PORT:$PORT" "$IMAGE_NAME"
echo "Kernel gateway available at http://localhost:$PORT"
"#,
        python_version = config.default_python_version,
        port = config.default_port,
        container_prefix = config.container_prefix,
        image_prefix = config.image_prefix,
        gateway_packages = gateway_packages,
        base_packages = base_packages,
        docker = config.binary,
    )
}
