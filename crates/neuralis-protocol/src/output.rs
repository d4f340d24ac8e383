//! Execution output model returned to notebook clients.

use serde::{Deserialize, Serialize};

use crate::jupyter::{DisplayDataContent, ExecuteResultContent, IoPub};

/// Discriminant of an [`OutputEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    ExecuteResult,
    Error,
    Stream,
    DisplayData,
}

/// Inline image payload (base64).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(rename = "type")]
    pub mime: String,
    pub data: String,
}

impl ImageData {
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            mime: "image/png".to_string(),
            data: data.into(),
        }
    }
}

/// One piece of output produced by an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub content: String,
    /// Stream name (`stdout` / `stderr`) for stream events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<ImageData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u64>,
}

impl OutputEvent {
    pub fn execute_result(content: impl Into<String>, execution_count: Option<u64>) -> Self {
        Self {
            kind: OutputKind::ExecuteResult,
            content: content.into(),
            name: None,
            image_data: None,
            execution_count,
        }
    }

    pub fn stream(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Stream,
            content: text.into(),
            name: Some(name.into()),
            image_data: None,
            execution_count: None,
        }
    }

    pub fn display_image(png_base64: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::DisplayData,
            content: String::new(),
            name: None,
            image_data: Some(ImageData::png(png_base64)),
            execution_count: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Error,
            content: content.into(),
            name: None,
            image_data: None,
            execution_count: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == OutputKind::Error
    }

    /// Convert an iopub reply into an output event.
    ///
    /// `status` and unrelated message types produce `None`.
    pub fn from_iopub(iopub: &IoPub) -> Option<Self> {
        match iopub {
            IoPub::Stream(stream) => Some(Self::stream(&stream.name, &stream.text)),
            IoPub::ExecuteResult(ExecuteResultContent {
                execution_count,
                data,
            }) => {
                let mut event = Self::execute_result(
                    data.text("text/plain")
                        .or_else(|| data.text("text/html"))
                        .unwrap_or_default(),
                    *execution_count,
                );
                event.image_data = data.png().map(ImageData::png);
                Some(event)
            }
            IoPub::DisplayData(DisplayDataContent { data }) => Some(Self {
                kind: OutputKind::DisplayData,
                content: data
                    .text("text/html")
                    .or_else(|| data.text("text/plain"))
                    .unwrap_or_default(),
                name: None,
                image_data: data.png().map(ImageData::png),
                execution_count: None,
            }),
            IoPub::Error(err) => Some(Self::error(err.render())),
            IoPub::Status(_) | IoPub::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Ok,
    Error,
}

/// Result of one execution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    /// Queue the request ran on (kernel id or `session:<id>`).
    pub kernel_id: String,
    pub status: ExecutionStatus,
    pub execution_count: u64,
    pub outputs: Vec<OutputEvent>,
}

impl ExecutionResult {
    /// Build a result whose status is derived from the outputs.
    pub fn from_outputs(
        execution_id: impl Into<String>,
        kernel_id: impl Into<String>,
        execution_count: u64,
        outputs: Vec<OutputEvent>,
    ) -> Self {
        let status = if outputs.iter().any(OutputEvent::is_error) {
            ExecutionStatus::Error
        } else {
            ExecutionStatus::Ok
        };
        Self {
            execution_id: execution_id.into(),
            kernel_id: kernel_id.into(),
            status,
            execution_count,
            outputs,
        }
    }

    /// Visible text of all non-error outputs, in order.
    pub fn text(&self) -> String {
        self.outputs
            .iter()
            .filter(|o| !o.is_error())
            .map(|o| o.content.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jupyter::{MimeBundle, StatusContent, StreamContent};
    use serde_json::json;

    #[test]
    fn test_output_event_serialization() {
        let event = OutputEvent::execute_result("42", Some(3));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "execute_result", "content": "42", "executionCount": 3})
        );

        let image = OutputEvent::display_image("AAAA");
        let value = serde_json::to_value(&image).unwrap();
        assert_eq!(value["type"], "display_data");
        assert_eq!(value["imageData"], json!({"type": "image/png", "data": "AAAA"}));
    }

    #[test]
    fn test_from_iopub() {
        let stream = IoPub::Stream(StreamContent {
            name: "stderr".into(),
            text: "warn".into(),
        });
        let event = OutputEvent::from_iopub(&stream).unwrap();
        assert_eq!(event.kind, OutputKind::Stream);
        assert_eq!(event.name.as_deref(), Some("stderr"));

        let data: MimeBundle =
            serde_json::from_value(json!({"text/plain": "<Figure>", "image/png": "PNG"})).unwrap();
        let display = IoPub::DisplayData(DisplayDataContent { data });
        let event = OutputEvent::from_iopub(&display).unwrap();
        assert_eq!(event.content, "<Figure>");
        assert_eq!(event.image_data, Some(ImageData::png("PNG")));

        let status = IoPub::Status(StatusContent {
            execution_state: crate::jupyter::ExecutionState::Idle,
        });
        assert!(OutputEvent::from_iopub(&status).is_none());
    }

    #[test]
    fn test_result_status_follows_outputs() {
        let ok = ExecutionResult::from_outputs(
            "e1",
            "k1",
            1,
            vec![OutputEvent::stream("stdout", "a"), OutputEvent::execute_result("b", None)],
        );
        assert_eq!(ok.status, ExecutionStatus::Ok);
        assert_eq!(ok.text(), "ab");

        let failed = ExecutionResult::from_outputs("e2", "k1", 2, vec![OutputEvent::error("boom")]);
        assert_eq!(failed.status, ExecutionStatus::Error);
    }
}
