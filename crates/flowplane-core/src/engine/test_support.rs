//! Shared doubles for engine tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use uuid::Uuid;

use flowplane_types::dsl::Node;
use flowplane_types::error::QueueError;
use flowplane_types::workflow::WorkflowRun;

use crate::queue::{RunJob, RunQueue};

use super::context::RunContext;
use super::executor::{DispatchRequest, ExecutorInfo, ExecutorTransport, TransportError};
use super::node_runner::{NodeResult, NodeRunError, NodeRunner};

pub fn executor_info(id: &str, org: Uuid, pool: &str, caps: &[&str]) -> ExecutorInfo {
    ExecutorInfo {
        executor_id: id.to_string(),
        organization_id: org,
        pool: pool.to_string(),
        capabilities: caps.iter().map(|s| s.to_string()).collect(),
    }
}

/// Node runner with per-node programmed results, consumed in order. A node
/// with no programmed results succeeds with `{"ok": true}`.
#[derive(Default)]
pub struct StubRunner {
    programmed: Mutex<HashMap<String, Vec<Result<Value, String>>>>,
    calls: Mutex<Vec<String>>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(&self, node_id: &str, result: Result<Value, String>) {
        self.programmed
            .lock()
            .unwrap()
            .entry(node_id.to_string())
            .or_default()
            .push(result);
    }

    /// Node ids in execution order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl NodeRunner for StubRunner {
    async fn run(
        &self,
        _run: &WorkflowRun,
        node: &Node,
        _ctx: &RunContext,
    ) -> Result<NodeResult, NodeRunError> {
        self.calls.lock().unwrap().push(node.id.clone());
        let next = {
            let mut programmed = self.programmed.lock().unwrap();
            programmed.get_mut(&node.id).and_then(|results| {
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            })
        };
        match next {
            Some(Ok(output)) => Ok(NodeResult::new(output)),
            Some(Err(message)) => Err(NodeRunError::new(message)),
            None => Ok(NodeResult::new(json!({"ok": true}))),
        }
    }
}

/// Transport that records outbound dispatches; can be flipped to fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<DispatchRequest>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<DispatchRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl ExecutorTransport for RecordingTransport {
    async fn send(
        &self,
        executor_id: &str,
        request: DispatchRequest,
    ) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError {
                executor_id: executor_id.to_string(),
                message: "injected transport failure".to_string(),
            });
        }
        self.sent.lock().unwrap().push(request);
        Ok(())
    }
}

/// Queue double recording enqueued jobs; can be flipped to fail for
/// compensation tests.
#[derive(Default)]
pub struct TestQueue {
    jobs: Mutex<Vec<RunJob>>,
    fail: AtomicBool,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<RunJob> {
        self.jobs.lock().unwrap().clone()
    }
}

impl RunQueue for TestQueue {
    async fn enqueue(&self, job: RunJob) -> Result<(), QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(
                "injected queue failure".to_string(),
            ));
        }
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}
