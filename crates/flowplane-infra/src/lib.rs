//! Infrastructure for Flowplane: SQLite persistence, the in-process run
//! queue, the worker pool, node runners, and executor transport.

pub mod config;
pub mod http_runner;
pub mod queue;
pub mod sqlite;
pub mod transport;
pub mod worker;
