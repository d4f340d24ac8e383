//! Python process backend.
//!
//! User code is wrapped in a small driver script that captures stdout and
//! stderr, forces the matplotlib `Agg` backend and turns `plt.show()` into
//! `IMAGE_DATA:<base64 png>:` markers on stdout. The markers are stripped from
//! the visible text and returned as `display_data` events.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::debug;
use neuralis_protocol::OutputEvent;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::ExecutionBackend;
use super::error::ExecResult;
use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::conda::CondaRuntime;
use crate::container::DockerRuntime;

pub const IMAGE_MARKER: &str = "IMAGE_DATA:";

static IMAGE_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"IMAGE_DATA:([A-Za-z0-9+/=]*):\n?").expect("Invalid regex pattern for image marker")
});

const DRIVER_TEMPLATE: &str = r#"import base64 as _nx_base64
import io as _nx_io
import sys as _nx_sys
import traceback as _nx_traceback

_nx_out = _nx_io.StringIO()
_nx_err = _nx_io.StringIO()

try:
    import matplotlib as _nx_matplotlib
    _nx_matplotlib.use("Agg")
    import matplotlib.pyplot as _nx_plt

    def _nx_show(*args, **kwargs):
        for _nx_num in _nx_plt.get_fignums():
            _nx_buf = _nx_io.BytesIO()
            _nx_plt.figure(_nx_num).savefig(_nx_buf, format="png", bbox_inches="tight")
            print("IMAGE_DATA:" + _nx_base64.b64encode(_nx_buf.getvalue()).decode("ascii") + ":")
        _nx_plt.close("all")

    _nx_plt.show = _nx_show
except ImportError:
    _nx_plt = None

_nx_source = _nx_base64.b64decode("__NEURALIS_CODE__").decode("utf-8")
_nx_status = 0
_nx_sys.stdout, _nx_sys.stderr = _nx_out, _nx_err
try:
    exec(compile(_nx_source, "<cell>", "exec"), {"__name__": "__main__"})
    if _nx_plt is not None and _nx_plt.get_fignums():
        _nx_plt.show()
except SystemExit as _nx_exit:
    _nx_status = _nx_exit.code
except BaseException:
    _nx_status = 1
    _nx_traceback.print_exc()
finally:
    _nx_sys.stdout, _nx_sys.stderr = _nx_sys.__stdout__, _nx_sys.__stderr__

_nx_sys.stdout.write(_nx_out.getvalue())
_nx_sys.stderr.write(_nx_err.getvalue())
_nx_sys.stdout.flush()
_nx_sys.exit(_nx_status)
"#;

/// Wrap user code in the capture driver. The code is embedded base64-encoded
/// so no quoting or re-indentation of user input is needed.
pub fn wrap_code(code: &str) -> String {
    DRIVER_TEMPLATE.replace("__NEURALIS_CODE__", &BASE64.encode(code.as_bytes()))
}

/// Split driver stdout into visible text and base64 PNG payloads.
pub fn extract_images(stdout: &str) -> (String, Vec<String>) {
    let images = IMAGE_DATA
        .captures_iter(stdout)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|data| !data.is_empty())
        .collect();
    let text = IMAGE_DATA.replace_all(stdout, "").into_owned();
    (text, images)
}

/// Turn a finished driver process into output events.
pub fn outputs_from_process(output: &CommandOutput, execution_count: u64) -> Vec<OutputEvent> {
    let (text, images) = extract_images(&output.stdout);
    let mut events = Vec::new();

    if output.success() {
        if !output.stderr.is_empty() {
            events.push(OutputEvent::stream("stderr", output.stderr.clone()));
        }
        events.push(OutputEvent::execute_result(text, Some(execution_count)));
        events.extend(images.into_iter().map(OutputEvent::display_image));
    } else {
        if !text.is_empty() {
            events.push(OutputEvent::stream("stdout", text));
        }
        events.extend(images.into_iter().map(OutputEvent::display_image));
        let message = if output.stderr.trim().is_empty() {
            match output.code {
                Some(code) => format!("process exited with status {code}"),
                None => "process was terminated by a signal".to_string(),
            }
        } else {
            output.stderr.clone()
        };
        events.push(OutputEvent::error(message));
    }

    events
}

/// How the interpreter is launched.
#[derive(Debug, Clone)]
pub enum Launcher {
    /// A local interpreter run against a script file.
    Interpreter(String),
    /// `conda run -n <env> python <file>`.
    Conda { runtime: CondaRuntime, env: String },
    /// `docker exec -i <container> python -` with the script on stdin.
    Docker { runtime: DockerRuntime, container: String },
}

/// Executes code by running a fresh interpreter process per request.
pub struct PythonBackend {
    runner: Arc<dyn CommandRunner>,
    launcher: Launcher,
    scratch_dir: PathBuf,
    timeout: Option<Duration>,
}

impl PythonBackend {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        launcher: Launcher,
        scratch_dir: PathBuf,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            launcher,
            scratch_dir,
            timeout,
        }
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    async fn write_script(&self, script: &str) -> ExecResult<PathBuf> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let stamp = chrono::Utc::now().timestamp_millis();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = self
            .scratch_dir
            .join(format!("execution_{stamp}_{}.py", &suffix[..8]));
        tokio::fs::write(&path, script).await?;
        Ok(path)
    }

    async fn command_for(&self, script: String) -> ExecResult<(CommandSpec, Option<PathBuf>)> {
        let prepared = match &self.launcher {
            Launcher::Interpreter(python) => {
                let path = self.write_script(&script).await?;
                let spec = CommandSpec::new(python)
                    .arg(path.display().to_string())
                    .current_dir(&self.scratch_dir);
                (spec, Some(path))
            }
            Launcher::Conda { runtime, env } => {
                let path = self.write_script(&script).await?;
                let spec = runtime
                    .python_command(env, &path.display().to_string())?
                    .current_dir(&self.scratch_dir);
                (spec, Some(path))
            }
            Launcher::Docker { runtime, container } => {
                (runtime.python_exec_command(container, script)?, None)
            }
        };
        Ok(prepared)
    }
}

#[async_trait]
impl ExecutionBackend for PythonBackend {
    async fn execute(&self, code: &str, execution_count: u64) -> ExecResult<Vec<OutputEvent>> {
        let (spec, script_path) = self.command_for(wrap_code(code)).await?;
        let result = self.runner.run(&spec.maybe_timeout(self.timeout)).await;

        if let Some(path) = script_path {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("could not remove {}: {e}", path.display());
            }
        }

        let output = result?;
        Ok(outputs_from_process(&output, execution_count))
    }
}
