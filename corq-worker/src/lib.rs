//! # CORQ Worker
//!
//! The worker process consumes jobs from the shared queue, dispatches them
//! to the computation backend and publishes exactly one reply per job. One
//! worker runs one job at a time; throughput scales by running more worker
//! processes, not by concurrency inside a single worker.

pub mod backend;
pub mod norms;
pub mod worker;

pub use backend::{Backend, TableBackend};
pub use norms::NormsCache;
pub use worker::Worker;
