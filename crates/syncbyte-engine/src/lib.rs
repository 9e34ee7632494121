//! Sync execution engine: attempt-scoped orchestration of replication and
//! normalization, the replication data plane, and the generic attempt
//! execution wrapper.

pub mod activities;
pub mod attempt;
pub mod cancellation;
pub mod config;
pub mod destination;
pub mod error;
pub mod mapper;
pub mod messages;
pub mod normalization;
pub mod orchestrator;
pub mod process;
pub mod replication;
pub mod source;
pub mod test_utils;
pub mod tracker;
pub mod validation;
pub mod worker;
pub mod workspace;

// Re-export public API for convenience
pub use activities::LocalActivities;
pub use attempt::AttemptExecution;
pub use cancellation::CancellationHandler;
pub use error::{PartialProgress, WorkerError};
pub use orchestrator::{ActivityOptions, SyncActivities, SyncFailure, SyncOrchestrator, SyncPhase};
