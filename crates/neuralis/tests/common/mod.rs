//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;

use neuralis::api::{AppState, create_router};
use neuralis::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use neuralis::config::AppConfig;

/// Records every command and answers from a table keyed by
/// `"<program> <first arg>"`, falling back to `"<program>"`. Unknown commands
/// succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    replies: Mutex<HashMap<String, CommandOutput>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, key: &str, code: i32, stdout: &str, stderr: &str) {
        self.replies.lock().unwrap().insert(
            key.to_string(),
            CommandOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls whose key is `key`.
    pub fn calls_to(&self, key: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| key_of(spec) == key)
            .collect()
    }
}

fn key_of(spec: &CommandSpec) -> String {
    match spec.args.first() {
        Some(first) => format!("{} {first}", spec.program),
        None => spec.program.clone(),
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());
        let replies = self.replies.lock().unwrap();
        let reply = replies
            .get(&key_of(spec))
            .or_else(|| replies.get(&spec.program))
            .cloned()
            .unwrap_or(CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            });
        Ok(reply)
    }
}

/// A router wired to `runner`, with session directories under a fresh temp dir.
pub fn test_app(runner: Arc<FakeRunner>) -> (Router, AppState, TempDir) {
    let temp = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.execution.temp_root = Some(temp.path().display().to_string());

    let state = AppState::new(config, runner);
    (create_router(state.clone()), state, temp)
}
