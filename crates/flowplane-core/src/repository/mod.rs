//! Repository trait definitions (storage ports).
//!
//! The infrastructure layer implements these with SQLite; `memory` provides
//! in-memory doubles for engine tests and embedding. All state lives behind
//! these contracts -- there are no process-wide mutable singletons.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

pub mod approval;
pub mod definition;
pub mod event;
pub mod memory;
pub mod run;
pub mod trigger;

pub use approval::ApprovalRepository;
pub use definition::DefinitionRepository;
pub use event::EventRepository;
pub use run::RunRepository;
pub use trigger::TriggerRepository;

/// Convenience bound for components that need the full engine-side store.
pub trait EngineStore:
    DefinitionRepository + RunRepository + EventRepository + ApprovalRepository
{
}

impl<T> EngineStore for T where
    T: DefinitionRepository + RunRepository + EventRepository + ApprovalRepository
{
}
