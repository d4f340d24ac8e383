//! Jupyter Kernel Gateway client.
//!
//! Kernels are managed over the gateway's REST API; code runs over the
//! `/api/kernels/<id>/channels` WebSocket. One reader task routes incoming
//! frames to the pending request whose `msg_id` matches the frame's
//! `parent_header.msg_id`.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use neuralis_protocol::{ExecutionState, IoPub, KernelMessage, OutputEvent};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

use super::ExecutionBackend;
use crate::validate::validate_gateway_kernel_id;
use super::error::{ExecResult, GatewayError};

/// Where a Kernel Gateway listens and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
}

impl GatewayEndpoint {
    pub fn new(host: impl Into<String>, port: u16, token: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token,
        }
    }

    fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn http_base(&self) -> String {
        format!("http://{}", self.authority())
    }

    pub fn channels_url(&self, kernel_id: &str) -> String {
        format!("ws://{}/api/kernels/{kernel_id}/channels", self.authority())
    }

    fn auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("token {token}"))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_header() {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KernelModel {
    id: String,
}

async fn post(
    http: &reqwest::Client,
    endpoint: &GatewayEndpoint,
    path: &str,
    body: Option<serde_json::Value>,
) -> Result<reqwest::Response, GatewayError> {
    let url = format!("{}{path}", endpoint.http_base());
    let mut request = endpoint.authorize(http.post(&url));
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::Timeout(url.clone())
        } else if e.is_connect() {
            GatewayError::Connect {
                url: url.clone(),
                message: e.to_string(),
            }
        } else {
            GatewayError::Request(e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// `/api/kernels/<id><suffix>`, refusing ids that would escape the path.
fn kernel_path(kernel_id: &str, suffix: &str) -> Result<String, GatewayError> {
    validate_gateway_kernel_id(kernel_id).map_err(|e| GatewayError::Protocol(e.to_string()))?;
    Ok(format!("/api/kernels/{kernel_id}{suffix}"))
}

/// Start a kernel on the gateway and return its id.
pub async fn start_kernel(
    http: &reqwest::Client,
    endpoint: &GatewayEndpoint,
    kernel_name: &str,
) -> Result<String, GatewayError> {
    let response = post(
        http,
        endpoint,
        "/api/kernels",
        Some(serde_json::json!({ "name": kernel_name })),
    )
    .await?;
    let model: KernelModel = response
        .json()
        .await
        .map_err(|e| GatewayError::Protocol(format!("kernel model: {e}")))?;
    validate_gateway_kernel_id(&model.id).map_err(|e| GatewayError::Protocol(e.to_string()))?;
    debug!("started gateway kernel {} ({kernel_name})", model.id);
    Ok(model.id)
}

pub async fn interrupt_kernel(
    http: &reqwest::Client,
    endpoint: &GatewayEndpoint,
    kernel_id: &str,
) -> Result<(), GatewayError> {
    post(http, endpoint, &kernel_path(kernel_id, "/interrupt")?, None).await?;
    Ok(())
}

pub async fn restart_kernel(
    http: &reqwest::Client,
    endpoint: &GatewayEndpoint,
    kernel_id: &str,
) -> Result<(), GatewayError> {
    post(http, endpoint, &kernel_path(kernel_id, "/restart")?, None).await?;
    Ok(())
}

type Pending = DashMap<String, mpsc::UnboundedSender<KernelMessage>>;

/// Route one incoming frame to the request it answers.
///
/// Unparsable frames, frames without a parent `msg_id` and replies for
/// requests nobody waits on are logged and dropped.
pub(crate) fn dispatch(pending: &Pending, text: &str) {
    let message: KernelMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("ignoring unparsable gateway frame: {e}");
            return;
        }
    };

    let Some(parent) = message.parent_msg_id().map(str::to_string) else {
        debug!("ignoring {} without parent msg_id", message.msg_type());
        return;
    };

    match pending.get(&parent) {
        Some(tx) => {
            // The waiter may have just timed out; nothing to do then.
            let _ = tx.send(message);
        }
        None => debug!("no pending request for {parent}, dropping {}", message.msg_type()),
    }
}

/// Removes a pending entry when the waiting future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Pending,
    msg_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.msg_id);
    }
}

/// A WebSocket connection to one gateway kernel.
#[derive(Debug)]
pub struct GatewayClient {
    kernel_id: String,
    session: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    timeout: Duration,
}

impl GatewayClient {
    /// Open the channels socket. The handshake is bounded by `timeout`, the
    /// same limit each later `execute` gets.
    pub async fn connect(
        endpoint: &GatewayEndpoint,
        kernel_id: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        validate_gateway_kernel_id(kernel_id).map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let url = endpoint.channels_url(kernel_id);
        let connect_error = |message: String| GatewayError::Connect {
            url: url.clone(),
            message,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error(e.to_string()))?;
        if let Some(value) = endpoint.auth_header() {
            let value = HeaderValue::from_str(&value).map_err(|e| connect_error(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| GatewayError::Timeout(url.clone()))?
            .map_err(|e| connect_error(e.to_string()))?;
        debug!("connected to {url}");

        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("gateway send failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            let kernel_id = kernel_id.to_string();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => dispatch(&pending, text.as_str()),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("gateway connection for {kernel_id} failed: {e}");
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                // Dropping the senders wakes every waiter with `Closed`.
                pending.clear();
                debug!("gateway connection for {kernel_id} closed");
            })
        };

        Ok(Self {
            kernel_id: kernel_id.to_string(),
            session: uuid::Uuid::new_v4().to_string(),
            outgoing,
            pending,
            closed,
            reader,
            writer,
            timeout,
        })
    }

    /// Gateway-side kernel id.
    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Requests still waiting for their `idle` status.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Add a pending entry. The closed flag is checked again after the
    /// insert: the reader may have drained `pending` in between.
    fn register<'a>(
        &'a self,
        msg_id: &'a str,
        tx: mpsc::UnboundedSender<KernelMessage>,
    ) -> Result<PendingGuard<'a>, GatewayError> {
        self.pending.insert(msg_id.to_string(), tx);
        let guard = PendingGuard {
            pending: &self.pending,
            msg_id,
        };
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }
        Ok(guard)
    }

    /// Send `execute_request` and collect outputs until the kernel goes idle.
    pub async fn execute(&self, code: &str) -> Result<Vec<OutputEvent>, GatewayError> {
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }

        let request = KernelMessage::execute_request(code, &self.session);
        let msg_id = request.msg_id().to_string();
        let frame =
            serde_json::to_string(&request).map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let (tx, mut replies) = mpsc::unbounded_channel();
        let _guard = self.register(&msg_id, tx)?;

        self.outgoing
            .send(Message::Text(frame.into()))
            .map_err(|_| GatewayError::Closed)?;

        let collect = async {
            let mut outputs = Vec::new();
            while let Some(reply) = replies.recv().await {
                match reply.iopub() {
                    Some(IoPub::Status(status)) if status.execution_state == ExecutionState::Idle => {
                        return Ok(outputs);
                    }
                    Some(iopub) => outputs.extend(OutputEvent::from_iopub(&iopub)),
                    None => debug!("unexpected {} content for {msg_id}", reply.msg_type()),
                }
            }
            Err(GatewayError::Closed)
        };

        match tokio::time::timeout(self.timeout, collect).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(msg_id.clone())),
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Executes code on a gateway kernel.
pub struct GatewayBackend {
    client: Arc<GatewayClient>,
}

impl GatewayBackend {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutionBackend for GatewayBackend {
    async fn execute(&self, code: &str, _execution_count: u64) -> ExecResult<Vec<OutputEvent>> {
        Ok(self.client.execute(code).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(parent: &str, msg_type: &str, content: serde_json::Value) -> String {
        json!({
            "header": {"msg_id": "r1", "msg_type": msg_type, "username": "gw", "session": "s", "version": "5.3"},
            "parent_header": {"msg_id": parent},
            "metadata": {},
            "content": content,
            "channel": "iopub"
        })
        .to_string()
    }

    #[test]
    fn test_endpoint_urls() {
        let endpoint = GatewayEndpoint::new("gw.local", 8888, None);
        assert_eq!(endpoint.http_base(), "http://gw.local:8888");
        assert_eq!(
            endpoint.channels_url("k1"),
            "ws://gw.local:8888/api/kernels/k1/channels"
        );

        let v6 = GatewayEndpoint::new("::1", 9000, Some("t".into()));
        assert_eq!(v6.http_base(), "http://[::1]:9000");
        assert_eq!(v6.auth_header().as_deref(), Some("token t"));
    }

    #[test]
    fn test_dispatch_routes_by_parent() {
        let pending: Pending = DashMap::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        pending.insert("m1".to_string(), tx);

        dispatch(&pending, &reply("m1", "stream", json!({"name": "stdout", "text": "hi"})));
        let routed = rx.try_recv().unwrap();
        assert_eq!(routed.msg_type(), "stream");
    }

    #[test]
    fn test_dispatch_ignores_noise() {
        let pending: Pending = DashMap::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        pending.insert("m1".to_string(), tx);

        dispatch(&pending, "not json");
        dispatch(&pending, &reply("", "status", json!({"execution_state": "busy"})));
        dispatch(&pending, &reply("other", "stream", json!({"name": "stdout", "text": "x"})));

        assert!(rx.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_pending_guard_removes_entry() {
        let pending: Pending = DashMap::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        pending.insert("m1".to_string(), tx);
        {
            let _guard = PendingGuard {
                pending: &pending,
                msg_id: "m1",
            };
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn test_kernel_path_rejects_traversal() {
        assert_eq!(
            kernel_path("a1-b2_c3", "/restart").unwrap(),
            "/api/kernels/a1-b2_c3/restart"
        );
        for id in ["", "../sessions", "k1/../../x", "k1?x=1", "k 1"] {
            assert!(
                matches!(kernel_path(id, "/interrupt"), Err(GatewayError::Protocol(_))),
                "{id:?} should be rejected"
            );
        }
    }

    fn detached_client(timeout: Duration) -> GatewayClient {
        let (outgoing, _rx) = mpsc::unbounded_channel();
        GatewayClient {
            kernel_id: "k1".into(),
            session: "s".into(),
            outgoing,
            pending: Arc::new(DashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
            reader: tokio::spawn(async {}),
            writer: tokio::spawn(async {}),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_register_after_close_fails_fast() {
        let client = detached_client(Duration::from_secs(30));
        // Reader finished between the first check and the insert.
        client.closed.store(true, Ordering::SeqCst);

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(client.register("m1", tx), Err(GatewayError::Closed)));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_register_while_open_keeps_entry() {
        let client = detached_client(Duration::from_secs(30));
        let (tx, _rx) = mpsc::unbounded_channel();
        {
            let _guard = client.register("m1", tx).unwrap();
            assert_eq!(client.pending_count(), 1);
        }
        assert_eq!(client.pending_count(), 0);
    }
}
