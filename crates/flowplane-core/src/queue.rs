//! Run queue port (the queue-handoff boundary).
//!
//! Admission creates the run row first (so its id is stable and
//! referenceable), then attempts the enqueue; a failed enqueue is
//! compensated by retracting the run. The producer side lives behind this
//! trait so tests can inject failures.

use flowplane_types::error::QueueError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a queued job asks a worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Begin processing a freshly admitted run.
    Start,
    /// Continue a run after an approval decision or a resolved dispatch.
    Resume,
}

/// One unit of work handed to the external execution queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJob {
    pub run_id: Uuid,
    pub organization_id: Uuid,
    pub kind: JobKind,
}

impl RunJob {
    pub fn start(run_id: Uuid, organization_id: Uuid) -> Self {
        Self {
            run_id,
            organization_id,
            kind: JobKind::Start,
        }
    }

    pub fn resume(run_id: Uuid, organization_id: Uuid) -> Self {
        Self {
            run_id,
            organization_id,
            kind: JobKind::Resume,
        }
    }
}

/// Producer contract for the run queue.
pub trait RunQueue: Send + Sync {
    fn enqueue(&self, job: RunJob) -> impl Future<Output = Result<(), QueueError>> + Send;
}
