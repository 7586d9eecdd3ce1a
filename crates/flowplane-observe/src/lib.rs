//! Observability wiring for Flowplane binaries.

pub mod tracing_setup;
