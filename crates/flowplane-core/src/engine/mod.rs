//! The run orchestration engine.
//!
//! `RunEngine` drives one claimed run at a time: it replays the event log to
//! recover position, walks the graph in deterministic order, and hands each
//! step to the `NodeDispatcher`. The `ApprovalGate` is the only component
//! that moves a blocked run back into the queue; `AdmissionService` is the
//! only component that creates runs. `Sweeper` enforces the two time bounds
//! (approval expiry, dispatch timeout) outside the request path.

pub mod admission;
pub mod approval;
pub mod context;
pub mod dispatcher;
pub mod executor;
pub mod node_runner;
pub mod state_machine;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_support;

pub use admission::{Admission, AdmissionService};
pub use approval::{ApprovalGate, DecisionOutcome};
pub use context::RunContext;
pub use dispatcher::{DispatchOutcome, NodeDispatcher};
pub use executor::{
    DispatchRequest, ExecutorInfo, ExecutorRegistry, ExecutorTransport, RemoteResult,
    TransportError,
};
pub use node_runner::{NodeResult, NodeRunError, NodeRunner};
pub use state_machine::{EngineConfig, Outcome, RunEngine};
pub use sweeper::Sweeper;
