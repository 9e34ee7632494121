//! Shared syncbyte data model: job identity, connector protocol messages,
//! configured catalogs, and sync input/output types.
//!
//! Only serialization and error crates are pulled in; there is no async
//! runtime here, so tooling that inspects sync results can depend on it
//! without the engine.

pub mod catalog;
pub mod job;
pub mod protocol;
pub mod stats;
pub mod sync;
