//! Run event log storage port.
//!
//! Append-only: the write path is the only mutation, and only the run state
//! machine, node dispatcher, and approval gate call it. Reads are cursor
//! paginated by the store-assigned `seq`.

use chrono::{DateTime, Utc};
use flowplane_types::error::RepositoryError;
use flowplane_types::event::{EventPage, NewRunEvent, RunEvent};
use uuid::Uuid;

/// Persistence contract for the per-run event log.
pub trait EventRepository: Send + Sync {
    /// Append one event; the store assigns `seq` and `created_at`.
    fn append_event(
        &self,
        event: NewRunEvent,
    ) -> impl Future<Output = Result<RunEvent, RepositoryError>> + Send;

    /// Cursor-paginated read ordered by `seq` ascending. `after` is the seq
    /// of the last event of the previous page.
    fn list_events(
        &self,
        run_id: &Uuid,
        limit: u32,
        after: Option<i64>,
    ) -> impl Future<Output = Result<EventPage, RepositoryError>> + Send;

    /// Full event stream of a run in append order (engine replay).
    fn replay_events(
        &self,
        run_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<RunEvent>, RepositoryError>> + Send;

    /// `node_dispatched` events older than `cutoff` with no matching
    /// `remote_result_received` (by `payload.request_id`) and no later
    /// terminal node event. Feeds the dispatch-timeout sweep.
    fn list_unresolved_dispatches(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<RunEvent>, RepositoryError>> + Send;
}
