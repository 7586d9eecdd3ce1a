//! Worker pool and sweeper loops.
//!
//! Workers pull jobs off the queue consumer and drive the claimed run to its
//! next suspension point. Any worker can process any job; the claim in
//! `RunEngine::drive` is what serializes access to a run. The sweeper loop
//! periodically expires overdue approvals, times out unresolved dispatches,
//! and re-enqueues queued runs whose job was lost.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use flowplane_core::engine::{ExecutorTransport, NodeRunner, RunEngine, Sweeper};
use flowplane_core::queue::RunQueue;
use flowplane_core::repository::EngineStore;

use crate::queue::QueueConsumer;

/// Spawn `worker_count` run-processing workers sharing one queue consumer.
///
/// Workers stop when the token is cancelled or the queue closes.
pub fn spawn_workers<S, R, T, Q>(
    engine: Arc<RunEngine<S, R, T, Q>>,
    consumer: QueueConsumer,
    worker_count: usize,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>>
where
    S: EngineStore + 'static,
    R: NodeRunner + 'static,
    T: ExecutorTransport + 'static,
    Q: RunQueue + 'static,
{
    let consumer = Arc::new(Mutex::new(consumer));
    (0..worker_count.max(1))
        .map(|i| {
            let engine = engine.clone();
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            let worker_id = format!("worker-{i}");
            tokio::spawn(async move {
                info!(worker_id, "worker started");
                loop {
                    let job = tokio::select! {
                        _ = cancel.cancelled() => break,
                        job = async { consumer.lock().await.recv().await } => job,
                    };
                    let Some(job) = job else {
                        break;
                    };
                    match engine.drive(job.run_id, &worker_id).await {
                        Ok(outcome) => {
                            debug!(worker_id, run_id = %job.run_id, ?outcome, "run driven")
                        }
                        Err(err) => {
                            error!(worker_id, run_id = %job.run_id, %err, "drive failed")
                        }
                    }
                }
                info!(worker_id, "worker stopped");
            })
        })
        .collect()
}

/// Spawn the periodic approval-expiry, dispatch-timeout, and stranded-run
/// sweep.
pub fn spawn_sweeper<S, Q>(
    sweeper: Arc<Sweeper<S, Q>>,
    interval_secs: u64,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: EngineStore + 'static,
    Q: RunQueue + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let now = Utc::now();
            match sweeper.sweep_approvals(now).await {
                Ok(0) => {}
                Ok(n) => info!(expired = n, "approvals expired"),
                Err(err) => error!(%err, "approval sweep failed"),
            }
            match sweeper.sweep_dispatches(now).await {
                Ok(0) => {}
                Ok(n) => info!(timed_out = n, "dispatches timed out"),
                Err(err) => error!(%err, "dispatch sweep failed"),
            }
            match sweeper.sweep_stranded(now).await {
                Ok(0) => {}
                Ok(n) => info!(requeued = n, "stranded runs re-enqueued"),
                Err(err) => error!(%err, "stranded sweep failed"),
            }
        }
        info!("sweeper stopped");
    })
}
