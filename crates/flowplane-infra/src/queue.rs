//! In-process run queue.
//!
//! Producer/consumer pair over an unbounded tokio channel. The producer
//! implements the core `RunQueue` port; a dropped consumer turns every
//! subsequent enqueue into `QueueError::Unavailable`, which is exactly the
//! failure admission compensates for.

use tokio::sync::mpsc;

use flowplane_core::queue::{RunJob, RunQueue};
use flowplane_types::error::QueueError;

/// Producer half, shared by admission, the approval gate, and the sweeper.
#[derive(Clone)]
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<RunJob>,
}

/// Consumer half, owned by the worker pool.
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<RunJob>,
}

/// Create a connected producer/consumer pair.
pub fn run_queue() -> (InProcessQueue, QueueConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InProcessQueue { tx }, QueueConsumer { rx })
}

impl RunQueue for InProcessQueue {
    async fn enqueue(&self, job: RunJob) -> Result<(), QueueError> {
        self.tx
            .send(job)
            .map_err(|_| QueueError::Unavailable("run queue consumer dropped".to_string()))
    }
}

impl QueueConsumer {
    /// Next job, or `None` when every producer is gone.
    pub async fn recv(&mut self) -> Option<RunJob> {
        self.rx.recv().await
    }
}
