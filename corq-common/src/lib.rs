//! # CORQ Common Library
//!
//! Shared code for the CORQ API and worker processes including:
//! - Error types
//! - Configuration loading
//! - Message bus abstraction (in-memory and Redis implementations)
//! - Job/reply protocol types (Operation enum, WorkerReply)
//! - Mergeable result types (FreqDistrib and friends)

pub mod bus;
pub mod config;
pub mod error;
pub mod proto;
pub mod results;

pub use error::{Error, Result};
