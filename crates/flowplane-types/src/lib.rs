//! Shared domain types for Flowplane.
//!
//! This crate contains the core domain types used across the Flowplane
//! platform: workflow DSL graphs, definitions, runs, run events, approval
//! requests, and trigger subscriptions, plus their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod approval;
pub mod config;
pub mod dsl;
pub mod error;
pub mod event;
pub mod trigger;
pub mod workflow;
