//! Amazon Q CLI bridge.

use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::command::{CommandError, CommandRunner, CommandSpec};
use crate::config::AssistantConfig;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Amazon Q CLI is not available: {0}")]
    Unavailable(String),

    #[error("Amazon Q CLI did not answer within {0}s")]
    Timeout(u64),

    #[error("Amazon Q CLI failed: {0}")]
    CommandFailed(String),
}

/// `q --version` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AmazonQ {
    binary: String,
    timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl AmazonQ {
    pub fn new(config: &AssistantConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            runner,
        }
    }

    pub async fn check(&self) -> AssistantStatus {
        let spec = CommandSpec::new(&self.binary)
            .arg("--version")
            .timeout(self.timeout);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => AssistantStatus {
                available: true,
                version: Some(output.stdout.trim().to_string()),
                error: None,
            },
            Ok(output) => AssistantStatus {
                available: false,
                version: None,
                error: Some(output.failure_message()),
            },
            Err(e) => AssistantStatus {
                available: false,
                version: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Send one message to `q chat` and return what it printed.
    pub async fn ask(&self, message: &str) -> Result<String, AssistantError> {
        if message.trim().is_empty() {
            return Err(AssistantError::InvalidInput("Message is required".into()));
        }

        let preview: String = message.chars().take(50).collect();
        info!("sending message to Amazon Q: {preview}");

        let spec = CommandSpec::new(&self.binary)
            .args(["chat", "--no-interactive"])
            .stdin(message)
            .timeout(self.timeout);
        let output = self.runner.run(&spec).await.map_err(|e| match e {
            CommandError::Timeout { timeout, .. } => AssistantError::Timeout(timeout.as_secs()),
            CommandError::Spawn { .. } => AssistantError::Unavailable(e.to_string()),
            CommandError::Io { .. } => AssistantError::CommandFailed(e.to_string()),
        })?;

        if !output.success() {
            return Err(AssistantError::CommandFailed(output.failure_message()));
        }
        debug!("Amazon Q answered with {} bytes", output.stdout.len());
        Ok(output.combined())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Reply {
        Output(CommandOutput),
        Timeout,
        Missing,
    }

    struct ScriptedQ {
        reply: Reply,
        seen: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedQ {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedQ {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
            self.seen.lock().unwrap().push(spec.clone());
            match self.reply {
                Reply::Output(ref output) => Ok(output.clone()),
                Reply::Timeout => Err(CommandError::Timeout {
                    program: spec.program.clone(),
                    timeout: spec.timeout.unwrap(),
                }),
                Reply::Missing => Err(CommandError::Spawn {
                    program: spec.program.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            }
        }
    }

    fn output(code: i32, stdout: &str, stderr: &str) -> Reply {
        Reply::Output(CommandOutput {
            code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        })
    }

    #[tokio::test]
    async fn test_ask_pipes_message_on_stdin() {
        let runner = ScriptedQ::new(output(0, "Use a list comprehension.\n", ""));
        let q = AmazonQ::new(&AssistantConfig::default(), runner.clone());

        let answer = q.ask("How do I square a list?").await.unwrap();
        assert_eq!(answer, "Use a list comprehension.\n");

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].program, "q");
        assert_eq!(seen[0].args, vec!["chat", "--no-interactive"]);
        assert_eq!(seen[0].stdin.as_deref(), Some("How do I square a list?"));
        assert_eq!(seen[0].timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_ask_errors() {
        let q = AmazonQ::new(&AssistantConfig::default(), ScriptedQ::new(output(0, "", "")));
        assert!(matches!(q.ask("   ").await, Err(AssistantError::InvalidInput(_))));

        let q = AmazonQ::new(&AssistantConfig::default(), ScriptedQ::new(Reply::Timeout));
        assert!(matches!(q.ask("hi").await, Err(AssistantError::Timeout(30))));

        let q = AmazonQ::new(&AssistantConfig::default(), ScriptedQ::new(Reply::Missing));
        assert!(matches!(q.ask("hi").await, Err(AssistantError::Unavailable(_))));

        let q = AmazonQ::new(
            &AssistantConfig::default(),
            ScriptedQ::new(output(2, "", "not logged in\n")),
        );
        match q.ask("hi").await {
            Err(AssistantError::CommandFailed(message)) => assert!(message.contains("not logged in")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_check() {
        let q = AmazonQ::new(
            &AssistantConfig::default(),
            ScriptedQ::new(output(0, "q 1.7.2\n", "")),
        );
        let status = q.check().await;
        assert!(status.available);
        assert_eq!(status.version.as_deref(), Some("q 1.7.2"));

        let q = AmazonQ::new(&AssistantConfig::default(), ScriptedQ::new(Reply::Missing));
        let status = q.check().await;
        assert!(!status.available);
        assert!(status.error.is_some());
    }
}
