use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::common::errors::{BridgeError, CommandResult};

type WriteOperation = Pin<Box<dyn Future<Output = CommandResult> + Send + 'static>>;

struct QueuedWrite {
    label: String,
    operation: WriteOperation,
    reply: oneshot::Sender<CommandResult>,
}

struct WriteQueue {
    sender: mpsc::UnboundedSender<QueuedWrite>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct QueueTable {
    open: HashMap<String, WriteQueue>,
    /// Workers of closed queues that may still be running accepted writes.
    draining: HashMap<String, JoinHandle<()>>,
}

/// Runs mutating flowctl operations one at a time, per workspace, in
/// submission order. Each workspace gets one worker task; a failed or
/// panicked operation is handed back to its caller and the worker moves on.
#[derive(Default)]
pub struct WriteSerializer {
    queues: Mutex<QueueTable>,
}

/// Result of a queued write. The write is already queued when this is
/// created; dropping it does not cancel the operation.
#[must_use = "the write runs regardless, but its result is only observable by awaiting"]
pub struct PendingWrite {
    label: String,
    receiver: oneshot::Receiver<CommandResult>,
}

impl Future for PendingWrite {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CommandResult> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::aborted_write(&self.label))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl WriteSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `operation` behind every write previously submitted for
    /// `workspace_key`, including writes accepted before the queue was
    /// last closed. Must be called from within a Tokio runtime.
    pub fn enqueue<F>(&self, workspace_key: &str, label: impl Into<String>, operation: F) -> PendingWrite
    where
        F: Future<Output = CommandResult> + Send + 'static,
    {
        let label = label.into();
        let (reply, receiver) = oneshot::channel();
        let mut write = QueuedWrite {
            label: label.clone(),
            operation: Box::pin(operation),
            reply,
        };

        let mut queues = self.queues();
        if let Some(queue) = queues.open.get(workspace_key) {
            match queue.sender.send(write) {
                Ok(()) => return PendingWrite { label, receiver },
                Err(mpsc::error::SendError(returned)) => write = returned,
            }
        }

        let previous = match queues.open.remove(workspace_key) {
            Some(stale) => Some(stale.worker),
            None => queues.draining.remove(workspace_key),
        };
        let (sender, queue) = mpsc::unbounded_channel();
        if sender.send(write).is_err() {
            warn!(workspace = %workspace_key, %label, "write worker exited before accepting work");
        }
        let worker = tokio::spawn(run_write_worker(workspace_key.to_string(), previous, queue));
        queues
            .open
            .insert(workspace_key.to_string(), WriteQueue { sender, worker });

        PendingWrite { label, receiver }
    }

    /// Stops accepting writes for `workspace_key`. Already queued writes
    /// still run to completion, and a later `enqueue` waits for them.
    pub fn close(&self, workspace_key: &str) {
        let mut queues = self.queues();
        queues.draining.retain(|_, worker| !worker.is_finished());
        if let Some(queue) = queues.open.remove(workspace_key) {
            queues.draining.insert(workspace_key.to_string(), queue.worker);
            debug!(workspace = %workspace_key, "closed write queue");
        }
    }

    pub fn is_open(&self, workspace_key: &str) -> bool {
        self.queues()
            .open
            .get(workspace_key)
            .map(|queue| !queue.sender.is_closed())
            .unwrap_or(false)
    }

    fn queues(&self) -> MutexGuard<'_, QueueTable> {
        match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn run_write_worker(
    workspace_key: String,
    previous: Option<JoinHandle<()>>,
    mut queue: mpsc::UnboundedReceiver<QueuedWrite>,
) {
    if let Some(previous) = previous {
        if !previous.is_finished() {
            debug!(workspace = %workspace_key, "waiting for closed write queue to drain");
        }
        let _ = previous.await;
    }

    while let Some(write) = queue.recv().await {
        let QueuedWrite {
            label,
            operation,
            reply,
        } = write;
        debug!(workspace = %workspace_key, %label, "starting queued write");

        // A separate task isolates panics, so the queue always advances.
        let result = match tokio::spawn(operation).await {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    workspace = %workspace_key,
                    %label,
                    %error,
                    "queued write stopped before producing a result"
                );
                Err(BridgeError::aborted_write(&label))
            }
        };

        if let Err(error) = &result {
            debug!(workspace = %workspace_key, %label, kind = error.kind(), "queued write failed");
        }
        if reply.send(result).is_err() {
            debug!(workspace = %workspace_key, %label, "caller stopped waiting for queued write");
        }
    }

    debug!(workspace = %workspace_key, "write worker drained");
}
