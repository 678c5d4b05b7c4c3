//! In-process job queue between the poller and the executor pool.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::models::CopyJob;

pub type JobSender = mpsc::UnboundedSender<CopyJob>;

/// Receiving half shared by every worker.
#[derive(Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::UnboundedReceiver<CopyJob>>>,
}

impl JobReceiver {
    /// Next job in FIFO order, or `None` once every sender is gone and the
    /// queue is drained. Only one worker waits on the channel at a time.
    pub async fn recv(&self) -> Option<CopyJob> {
        self.inner.lock().await.recv().await
    }
}

/// Unbounded single-producer, multi-consumer job queue.
pub fn job_queue() -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        tx,
        JobReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}
