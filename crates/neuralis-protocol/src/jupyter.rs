//! Jupyter kernel message envelope.
//!
//! Only the subset needed to run code through a Kernel Gateway is modeled:
//! `execute_request` going out on the shell channel, and the iopub replies
//! (`stream`, `execute_result`, `display_data`, `error`, `status`) coming back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message protocol version sent in outgoing headers.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Username reported to the gateway.
pub const DEFAULT_USERNAME: &str = "neuralis";

// ============================================================================
// Envelope
// ============================================================================

/// Message header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub msg_id: String,
    pub msg_type: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub session: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub version: String,
}

/// A message on one of the kernel channels.
///
/// `parent_header` is kept as raw JSON: kernels send `{}` for messages that
/// do not answer a request, and some gateways send `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelMessage {
    pub header: MessageHeader,
    #[serde(default)]
    pub parent_header: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Content of an `execute_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequestContent {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub user_expressions: Map<String, Value>,
    pub allow_stdin: bool,
    pub stop_on_error: bool,
}

impl KernelMessage {
    /// Build an `execute_request` for the shell channel with a fresh `msg_id`.
    pub fn execute_request(code: &str, session: &str) -> Self {
        let content = ExecuteRequestContent {
            code: code.to_string(),
            silent: false,
            store_history: true,
            user_expressions: Map::new(),
            allow_stdin: false,
            stop_on_error: true,
        };

        Self {
            header: MessageHeader {
                msg_id: uuid::Uuid::new_v4().to_string(),
                msg_type: "execute_request".to_string(),
                username: DEFAULT_USERNAME.to_string(),
                session: session.to_string(),
                date: Some(chrono::Utc::now().to_rfc3339()),
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: Value::Object(Map::new()),
            metadata: Value::Object(Map::new()),
            content: serde_json::to_value(content).unwrap_or(Value::Null),
            channel: Some("shell".to_string()),
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// The `msg_id` of the request this message answers, if any.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header
            .get("msg_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Interpret the content as an iopub reply.
    ///
    /// Returns `None` when the content does not match the shape expected for
    /// its `msg_type`.
    pub fn iopub(&self) -> Option<IoPub> {
        let content = self.content.clone();
        let parsed = match self.msg_type() {
            "stream" => IoPub::Stream(serde_json::from_value(content).ok()?),
            "execute_result" => IoPub::ExecuteResult(serde_json::from_value(content).ok()?),
            "display_data" | "update_display_data" => {
                IoPub::DisplayData(serde_json::from_value(content).ok()?)
            }
            "error" => IoPub::Error(serde_json::from_value(content).ok()?),
            "status" => IoPub::Status(serde_json::from_value(content).ok()?),
            other => IoPub::Other(other.to_string()),
        };
        Some(parsed)
    }
}

// ============================================================================
// Iopub content
// ============================================================================

/// Decoded iopub message content.
#[derive(Debug, Clone, PartialEq)]
pub enum IoPub {
    Stream(StreamContent),
    ExecuteResult(ExecuteResultContent),
    DisplayData(DisplayDataContent),
    Error(ErrorContent),
    Status(StatusContent),
    /// Any message type not needed for execution (e.g. `execute_input`).
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamContent {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResultContent {
    #[serde(default)]
    pub execution_count: Option<u64>,
    #[serde(default)]
    pub data: MimeBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayDataContent {
    #[serde(default)]
    pub data: MimeBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl ErrorContent {
    /// Traceback joined by newlines, or `ename: evalue` when the kernel sent none.
    pub fn render(&self) -> String {
        if self.traceback.is_empty() {
            format!("{}: {}", self.ename, self.evalue)
        } else {
            self.traceback.join("\n")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusContent {
    pub execution_state: ExecutionState,
}

/// MIME type → payload map carried by `execute_result` and `display_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MimeBundle(pub Map<String, Value>);

impl MimeBundle {
    /// Text payload for a MIME type. Multi-line payloads may arrive as arrays.
    pub fn text(&self, mime: &str) -> Option<String> {
        match self.0.get(mime)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(lines) => Some(
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            _ => None,
        }
    }

    pub fn png(&self) -> Option<String> {
        self.text("image/png").map(|data| data.replace('\n', ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_request_shape() {
        let msg = KernelMessage::execute_request("print(1)", "sess-1");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["header"]["msg_type"], "execute_request");
        assert_eq!(value["header"]["username"], "neuralis");
        assert_eq!(value["header"]["session"], "sess-1");
        assert_eq!(value["header"]["version"], PROTOCOL_VERSION);
        assert_eq!(value["channel"], "shell");
        assert_eq!(value["parent_header"], json!({}));
        assert_eq!(value["content"]["code"], "print(1)");
        assert_eq!(value["content"]["silent"], false);
        assert_eq!(value["content"]["store_history"], true);
        assert_eq!(value["content"]["allow_stdin"], false);
        assert!(!msg.msg_id().is_empty());
    }

    #[test]
    fn test_parent_msg_id_variants() {
        let with_parent: KernelMessage = serde_json::from_value(json!({
            "header": {"msg_id": "a", "msg_type": "status"},
            "parent_header": {"msg_id": "req-1"},
            "content": {"execution_state": "idle"}
        }))
        .unwrap();
        assert_eq!(with_parent.parent_msg_id(), Some("req-1"));

        let empty_parent: KernelMessage = serde_json::from_value(json!({
            "header": {"msg_id": "b", "msg_type": "status"},
            "parent_header": {},
            "content": {"execution_state": "busy"}
        }))
        .unwrap();
        assert_eq!(empty_parent.parent_msg_id(), None);

        let null_parent: KernelMessage = serde_json::from_value(json!({
            "header": {"msg_id": "c", "msg_type": "status"},
            "parent_header": null
        }))
        .unwrap();
        assert_eq!(null_parent.parent_msg_id(), None);

        let missing_parent: KernelMessage = serde_json::from_value(json!({
            "header": {"msg_id": "d", "msg_type": "status"}
        }))
        .unwrap();
        assert_eq!(missing_parent.parent_msg_id(), None);
    }

    #[test]
    fn test_iopub_decoding() {
        let stream: KernelMessage = serde_json::from_value(json!({
            "header": {"msg_id": "1", "msg_type": "stream"},
            "content": {"name": "stdout", "text": "hi\n"}
        }))
        .unwrap();
        assert_eq!(
            stream.iopub(),
            Some(IoPub::Stream(StreamContent {
                name: "stdout".into(),
                text: "hi\n".into()
            }))
        );

        let status: KernelMessage = serde_json::from_value(json!({
            "header": {"msg_id": "2", "msg_type": "status"},
            "content": {"execution_state": "idle"}
        }))
        .unwrap();
        assert_eq!(
            status.iopub(),
            Some(IoPub::Status(StatusContent {
                execution_state: ExecutionState::Idle
            }))
        );

        let broken: KernelMessage = serde_json::from_value(json!({
            "header": {"msg_id": "3", "msg_type": "stream"},
            "content": {"unexpected": true}
        }))
        .unwrap();
        assert_eq!(broken.iopub(), None);
    }

    #[test]
    fn test_error_render() {
        let with_tb = ErrorContent {
            ename: "ValueError".into(),
            evalue: "bad".into(),
            traceback: vec!["line 1".into(), "line 2".into()],
        };
        assert_eq!(with_tb.render(), "line 1\nline 2");

        let without_tb = ErrorContent {
            ename: "NameError".into(),
            evalue: "name 'x' is not defined".into(),
            traceback: vec![],
        };
        assert_eq!(without_tb.render(), "NameError: name 'x' is not defined");
    }

    #[test]
    fn test_mime_bundle_text_and_png() {
        let bundle: MimeBundle = serde_json::from_value(json!({
            "text/plain": ["a", "b"],
            "image/png": "iVBO\nRw0K"
        }))
        .unwrap();
        assert_eq!(bundle.text("text/plain").as_deref(), Some("ab"));
        assert_eq!(bundle.png().as_deref(), Some("iVBORw0K"));
        assert_eq!(bundle.text("text/html"), None);
    }
}
