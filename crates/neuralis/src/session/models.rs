use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A scratch workspace bound to a sequence of executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub session_dir: PathBuf,
    pub state_file: PathBuf,
    /// Interpreter used when no kernel is bound.
    pub python_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Listing entry for `GET /api/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            kernel_id: session.kernel_id.clone(),
            created_at: session.created_at,
        }
    }
}

/// Body of `POST /api/sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    pub python_path: Option<String>,
    pub kernel_id: Option<String>,
}

/// Body of `PUT /api/sessions/{id}/kernel`. A missing id unbinds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindKernel {
    pub kernel_id: Option<String>,
}
