//! Session registry backed by per-session directories under a temp root.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::models::{CreateSession, Session};

pub const SESSION_STATE_FILE: &str = "session_state.py";
const SESSION_STATE_HEADER: &str = "# Session state file\n";

pub struct SessionManager {
    root: PathBuf,
    default_python: String,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(root: impl Into<PathBuf>, default_python: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            default_python: default_python.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn create(&self, request: CreateSession) -> Result<Session> {
        let id = uuid::Uuid::new_v4().to_string();
        let session_dir = self.root.join(&id);
        tokio::fs::create_dir_all(&session_dir)
            .await
            .with_context(|| format!("creating session directory {}", session_dir.display()))?;

        let state_file = session_dir.join(SESSION_STATE_FILE);
        tokio::fs::write(&state_file, SESSION_STATE_HEADER)
            .await
            .with_context(|| format!("writing {}", state_file.display()))?;

        let session = Session {
            id: id.clone(),
            session_dir,
            state_file,
            python_path: request
                .python_path
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| self.default_python.clone()),
            kernel_id: request.kernel_id,
            created_at: Utc::now(),
        };

        self.sessions.write().await.insert(id.clone(), session.clone());
        info!("created session {id}");
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Session> {
        match self.sessions.read().await.get(id) {
            Some(session) => Ok(session.clone()),
            None => bail!("session not found: {id}"),
        }
    }

    /// Active sessions, oldest first.
    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub async fn bind_kernel(&self, id: &str, kernel_id: Option<String>) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            bail!("session not found: {id}");
        };
        debug!("session {id} bound to {kernel_id:?}");
        session.kernel_id = kernel_id;
        Ok(session.clone())
    }

    /// The session's directory, recreated if something removed it.
    pub async fn session_dir(&self, id: &str) -> Result<PathBuf> {
        let session = self.get(id).await?;
        if !tokio::fs::try_exists(&session.session_dir).await.unwrap_or(false) {
            debug!("recreating {}", session.session_dir.display());
            tokio::fs::create_dir_all(&session.session_dir)
                .await
                .with_context(|| {
                    format!("recreating session directory {}", session.session_dir.display())
                })?;
        }
        Ok(session.session_dir)
    }

    /// Forget a session. Its directory stays on disk.
    pub async fn close(&self, id: &str) -> Result<Session> {
        match self.sessions.write().await.remove(id) {
            Some(session) => {
                info!("closed session {id}");
                Ok(session)
            }
            None => bail!("session not found: {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_writes_state_file() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(root.path(), "python3");

        let session = manager.create(CreateSession::default()).await.unwrap();
        assert_eq!(session.session_dir, root.path().join(&session.id));
        assert_eq!(session.python_path, "python3");
        let state = std::fs::read_to_string(&session.state_file).unwrap();
        assert_eq!(state, "# Session state file\n");
        assert!(session.state_file.ends_with(SESSION_STATE_FILE));
    }

    #[tokio::test]
    async fn test_sessions_are_unique_and_listed_in_order() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(root.path(), "python");

        let first = manager.create(CreateSession::default()).await.unwrap();
        let second = manager
            .create(CreateSession {
                python_path: Some("/usr/bin/python3".into()),
                kernel_id: Some("conda_ds".into()),
            })
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(first.session_dir, second.session_dir);
        assert_eq!(second.kernel_id.as_deref(), Some("conda_ds"));

        let listed = manager.list().await;
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at <= listed[1].created_at);
    }

    #[tokio::test]
    async fn test_close_keeps_directory() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(root.path(), "python");
        let session = manager.create(CreateSession::default()).await.unwrap();

        manager.close(&session.id).await.unwrap();
        assert!(session.session_dir.exists());

        let err = manager.close(&session.id).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(manager.get(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_session_dir_is_recreated() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(root.path(), "python");
        let session = manager.create(CreateSession::default()).await.unwrap();

        std::fs::remove_dir_all(&session.session_dir).unwrap();
        let dir = manager.session_dir(&session.id).await.unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_bind_kernel() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(root.path(), "python");
        let session = manager.create(CreateSession::default()).await.unwrap();

        let bound = manager
            .bind_kernel(&session.id, Some("docker_abc".into()))
            .await
            .unwrap();
        assert_eq!(bound.kernel_id.as_deref(), Some("docker_abc"));

        let unbound = manager.bind_kernel(&session.id, None).await.unwrap();
        assert!(unbound.kernel_id.is_none());
        assert!(manager.bind_kernel("missing", None).await.is_err());
    }
}
