//! Capture driver tests against a real `python3`. Skipped when no interpreter
//! is on PATH.

use std::process::Command;
use std::sync::Arc;

use neuralis::command::SystemRunner;
use neuralis::execution::{ExecutionBackend, Launcher, PythonBackend};
use neuralis_protocol::{OutputEvent, OutputKind};
use tempfile::TempDir;

fn python_has(module: Option<&str>) -> bool {
    let mut command = Command::new("python3");
    match module {
        Some(module) => command.args(["-c", &format!("import {module}")]),
        None => command.arg("--version"),
    };
    command.output().map(|o| o.status.success()).unwrap_or(false)
}

fn backend() -> Option<(PythonBackend, TempDir)> {
    if !python_has(None) {
        eprintln!("python3 not found, skipping");
        return None;
    }
    let dir = tempfile::tempdir().unwrap();
    let backend = PythonBackend::new(
        Arc::new(SystemRunner),
        Launcher::Interpreter("python3".into()),
        dir.path().to_path_buf(),
        None,
    );
    Some((backend, dir))
}

#[tokio::test]
async fn test_driver_stdout_and_stderr() {
    let Some((backend, _dir)) = backend() else {
        return;
    };

    let events = backend.execute("print('hi')", 1).await.unwrap();
    assert_eq!(events, vec![OutputEvent::execute_result("hi\n", Some(1))]);

    let events = backend
        .execute("import sys\nprint('careful', file=sys.stderr)\nprint(6 * 7)", 2)
        .await
        .unwrap();
    assert_eq!(
        events,
        vec![
            OutputEvent::stream("stderr", "careful\n"),
            OutputEvent::execute_result("42\n", Some(2)),
        ]
    );
}

#[tokio::test]
async fn test_driver_reports_traceback() {
    let Some((backend, _dir)) = backend() else {
        return;
    };

    let events = backend.execute("print('before')\n1 / 0", 1).await.unwrap();
    assert_eq!(events[0], OutputEvent::stream("stdout", "before\n"));
    let last = events.last().unwrap();
    assert_eq!(last.kind, OutputKind::Error);
    assert!(last.content.contains("Traceback"));
    assert!(last.content.contains("ZeroDivisionError"));
}

#[tokio::test]
async fn test_driver_keeps_exit_status() {
    let Some((backend, _dir)) = backend() else {
        return;
    };

    let events = backend.execute("import sys\nsys.exit(3)", 1).await.unwrap();
    assert_eq!(events, vec![OutputEvent::error("process exited with status 3")]);

    let events = backend
        .execute("import sys\nprint('done')\nsys.exit(0)", 2)
        .await
        .unwrap();
    assert_eq!(events, vec![OutputEvent::execute_result("done\n", Some(2))]);

    let events = backend.execute("raise SystemExit('bye')", 3).await.unwrap();
    assert_eq!(events.last().unwrap().kind, OutputKind::Error);
    assert!(events.last().unwrap().content.contains("bye"));
}

#[tokio::test]
async fn test_driver_image_markers_become_display_data() {
    let Some((backend, _dir)) = backend() else {
        return;
    };

    let events = backend
        .execute("print('x')\nprint('IMAGE_DATA:cGxvdA==:')", 1)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], OutputEvent::execute_result("x\n", Some(1)));
    assert_eq!(events[1], OutputEvent::display_image("cGxvdA=="));
}

#[tokio::test]
async fn test_driver_captures_matplotlib_figures() {
    let Some((backend, _dir)) = backend() else {
        return;
    };
    if !python_has(Some("matplotlib")) {
        eprintln!("matplotlib not installed, skipping");
        return;
    }

    let events = backend
        .execute("import matplotlib.pyplot as plt\nplt.plot([1, 2, 3])", 1)
        .await
        .unwrap();
    let images: Vec<_> = events
        .iter()
        .filter(|e| e.kind == OutputKind::DisplayData)
        .collect();
    assert_eq!(images.len(), 1);
    let data = &images[0].image_data.as_ref().unwrap().data;
    assert!(data.starts_with("iVBORw0KGgo"));
    assert!(events.iter().all(|e| !e.content.contains("IMAGE_DATA:")));
}
