//! # CORQ API
//!
//! The API process accepts corpus queries over HTTP, fans them out across
//! corpus partitions through the message bus and merges the partial results
//! workers send back. Collocation queries additionally go through a log-Dice
//! re-ranking stage backed by further bus sub-queries.

pub mod api;
pub mod cache;
pub mod colldb;
pub mod dispatch;
pub mod fanout;
pub mod partitions;
pub mod qgen;
pub mod reorder;

pub use cache::FileCache;
pub use colldb::CollDatabase;
pub use dispatch::{Dispatcher, StatusWriter, TracingStatusWriter};
pub use partitions::PartitionSet;
pub use reorder::{CollocationCandidate, ReorderCalculator};
