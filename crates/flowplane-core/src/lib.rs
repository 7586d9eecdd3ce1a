//! Run orchestration engine and repository trait definitions for Flowplane.
//!
//! This crate defines the "ports" (repository and queue traits) that the
//! infrastructure layer implements, plus the pure/in-process pieces of the
//! engine: DSL validation, the run state machine, node dispatch, the
//! approval gate, and trigger admission. It depends only on
//! `flowplane-types` -- never on `flowplane-infra` or any database/IO crate.

pub mod dsl;
pub mod engine;
pub mod queue;
pub mod repository;
