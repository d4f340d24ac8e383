//! Per-kernel FIFO execution queue.
//!
//! Each queue owns one worker task that drains jobs strictly in order. A job
//! whose caller has already gone away is skipped, and a caller that goes away
//! mid-run cancels the running execution.

use log::{debug, info};
use neuralis_protocol::ExecutionResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::{ExecResult, ExecutionError};
use super::{ExecutionBackend, ExecutionRequest};

struct Job {
    request: ExecutionRequest,
    backend: Arc<dyn ExecutionBackend>,
    reply: oneshot::Sender<ExecResult<ExecutionResult>>,
}

pub struct ExecutionQueue {
    key: String,
    tx: mpsc::UnboundedSender<Job>,
    executed: Arc<AtomicU64>,
    worker: JoinHandle<()>,
}

impl ExecutionQueue {
    /// Create the queue and spawn its worker.
    pub fn spawn(key: impl Into<String>) -> Self {
        let key = key.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let executed = Arc::new(AtomicU64::new(0));

        let worker = {
            let key = key.clone();
            let executed = Arc::clone(&executed);
            tokio::spawn(async move {
                while let Some(mut job) = rx.recv().await {
                    if job.reply.is_closed() {
                        debug!("[{key}] skipping {}: caller went away", job.request.execution_id);
                        continue;
                    }

                    let count = executed.fetch_add(1, Ordering::SeqCst) + 1;
                    let execution_id = job.request.execution_id.clone();
                    debug!("[{key}] running {execution_id} (#{count})");

                    let outcome = tokio::select! {
                        outcome = job.backend.execute(&job.request.code, count) => Some(outcome),
                        _ = job.reply.closed() => None,
                    };
                    let Some(outcome) = outcome else {
                        info!("[{key}] cancelled {execution_id}");
                        continue;
                    };

                    let result = outcome.map(|outputs| {
                        ExecutionResult::from_outputs(execution_id, key.clone(), count, outputs)
                    });
                    let _ = job.reply.send(result);
                }
                debug!("[{key}] execution queue stopped");
            })
        };

        Self {
            key,
            tx,
            executed,
            worker,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Executions started so far on this queue.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }

    /// Append a request and wait for its turn and result.
    pub async fn submit(
        &self,
        request: ExecutionRequest,
        backend: Arc<dyn ExecutionBackend>,
    ) -> ExecResult<ExecutionResult> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job {
                request,
                backend,
                reply,
            })
            .map_err(|_| ExecutionError::QueueClosed(self.key.clone()))?;
        rx.await
            .map_err(|_| ExecutionError::QueueClosed(self.key.clone()))?
    }
}

impl Drop for ExecutionQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use neuralis_protocol::{ExecutionStatus, OutputEvent};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes the code back after an optional delay and records call order.
    #[derive(Default)]
    struct EchoBackend {
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ExecutionBackend for EchoBackend {
        async fn execute(&self, code: &str, count: u64) -> ExecResult<Vec<OutputEvent>> {
            self.calls.lock().unwrap().push(code.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if code == "fail" {
                return Ok(vec![OutputEvent::error("boom")]);
            }
            Ok(vec![OutputEvent::execute_result(code, Some(count))])
        }
    }

    #[tokio::test]
    async fn test_results_carry_key_and_counter() {
        let queue = ExecutionQueue::spawn("conda_ds");
        let backend = Arc::new(EchoBackend::default());

        let first = queue
            .submit(ExecutionRequest::new("a"), backend.clone())
            .await
            .unwrap();
        let second = queue
            .submit(ExecutionRequest::new("fail"), backend.clone())
            .await
            .unwrap();

        assert_eq!(first.kernel_id, "conda_ds");
        assert_eq!(first.execution_count, 1);
        assert_eq!(first.status, ExecutionStatus::Ok);
        assert_eq!(second.execution_count, 2);
        assert_eq!(second.status, ExecutionStatus::Error);
        assert_eq!(queue.executed(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_run_in_order() {
        let queue = Arc::new(ExecutionQueue::spawn("k"));
        let backend = Arc::new(EchoBackend {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = Arc::clone(&queue);
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move {
                queue
                    .submit(ExecutionRequest::new(format!("job{i}")), backend)
                    .await
            }));
            // Give each submission time to reach the channel before the next.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().unwrap().execution_count);
        }
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            *backend.calls.lock().unwrap(),
            vec!["job0", "job1", "job2", "job3", "job4"]
        );
    }

    #[tokio::test]
    async fn test_abandoned_request_is_skipped() {
        let queue = Arc::new(ExecutionQueue::spawn("k"));
        let backend = Arc::new(EchoBackend {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });

        let busy = {
            let queue = Arc::clone(&queue);
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { queue.submit(ExecutionRequest::new("slow"), backend).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Queued behind "slow", then abandoned before it is dequeued.
        let abandoned = queue.submit(ExecutionRequest::new("never"), backend.clone());
        let _ = tokio::time::timeout(Duration::from_millis(10), abandoned).await;

        busy.await.unwrap().unwrap();
        let last = queue
            .submit(ExecutionRequest::new("after"), backend.clone())
            .await
            .unwrap();

        assert_eq!(*backend.calls.lock().unwrap(), vec!["slow", "after"]);
        assert_eq!(last.execution_count, 2);
    }
}
