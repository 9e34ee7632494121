//! Worker error model and outcome classification.

use syncbyte_types::job::ConnectorRole;
use syncbyte_types::protocol::State;
use syncbyte_types::stats::{AttemptStatus, SyncStats};

// ---------------------------------------------------------------------------
// PartialProgress: how far a failed attempt got
// ---------------------------------------------------------------------------

/// Stats and last state tracked before an attempt stopped early.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialProgress {
    pub stats: SyncStats,
    pub state: Option<State>,
}

// ---------------------------------------------------------------------------
// WorkerError: one classified outcome per attempt
// ---------------------------------------------------------------------------

/// Classified failure of a worker or of the attempt wrapping it.
///
/// `Validation` and `Launch` happen before any data moves and never carry
/// partial progress. The remaining variants may carry a [`PartialProgress`]
/// snapshot so callers can see how far replication got.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Input did not conform to its schema. Nothing was launched.
    #[error("{kind} validation failed:\n{}", .violations.join("\n"))]
    Validation {
        kind: &'static str,
        violations: Vec<String>,
    },
    /// Worker construction or process start failed.
    #[error("failed to launch worker: {0:#}")]
    Launch(anyhow::Error),
    /// A connector emitted a malformed or out-of-contract message.
    #[error("protocol violation from {role}: {message}")]
    Protocol {
        role: ConnectorRole,
        message: String,
        partial: Option<PartialProgress>,
    },
    /// The destination rejected input or failed while loading.
    #[error("destination write failed: {message}")]
    DestinationWrite {
        message: String,
        partial: Option<PartialProgress>,
    },
    /// The worker itself failed (process exit, I/O, deadline).
    #[error("worker failed: {error:#}")]
    Runtime {
        error: anyhow::Error,
        partial: Option<PartialProgress>,
    },
    /// An external cancellation request stopped the attempt.
    #[error("attempt cancelled")]
    Cancelled { partial: Option<PartialProgress> },
}

impl WorkerError {
    pub fn runtime(error: impl Into<anyhow::Error>) -> Self {
        Self::Runtime {
            error: error.into(),
            partial: None,
        }
    }

    pub fn protocol(role: ConnectorRole, message: impl Into<String>) -> Self {
        Self::Protocol {
            role,
            message: message.into(),
            partial: None,
        }
    }

    pub fn destination_write(message: impl Into<String>) -> Self {
        Self::DestinationWrite {
            message: message.into(),
            partial: None,
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::Cancelled { partial: None }
    }

    /// Terminal status this error maps to.
    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        match self {
            Self::Cancelled { .. } => AttemptStatus::Cancelled,
            _ => AttemptStatus::Failed,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Partial progress attached to this error, if any.
    #[must_use]
    pub fn partial(&self) -> Option<&PartialProgress> {
        match self {
            Self::Protocol { partial, .. }
            | Self::DestinationWrite { partial, .. }
            | Self::Runtime { partial, .. }
            | Self::Cancelled { partial } => partial.as_ref(),
            Self::Validation { .. } | Self::Launch(_) => None,
        }
    }

    /// Attach partial progress unless the variant forbids it or already has one.
    #[must_use]
    pub fn with_partial(mut self, progress: PartialProgress) -> Self {
        match &mut self {
            Self::Protocol { partial, .. }
            | Self::DestinationWrite { partial, .. }
            | Self::Runtime { partial, .. }
            | Self::Cancelled { partial } => {
                if partial.is_none() {
                    *partial = Some(progress);
                }
            }
            Self::Validation { .. } | Self::Launch(_) => {}
        }
        self
    }

    /// Reclassify as cancellation, keeping any partial progress.
    #[must_use]
    pub fn into_cancelled(self) -> Self {
        match self {
            Self::Protocol { partial, .. }
            | Self::DestinationWrite { partial, .. }
            | Self::Runtime { partial, .. }
            | Self::Cancelled { partial } => Self::Cancelled { partial },
            Self::Validation { .. } | Self::Launch(_) => Self::cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(records: u64) -> PartialProgress {
        PartialProgress {
            stats: SyncStats {
                records_synced: records,
                ..SyncStats::default()
            },
            state: None,
        }
    }

    #[test]
    fn cancelled_is_distinct_from_failure() {
        assert_eq!(WorkerError::cancelled().status(), AttemptStatus::Cancelled);
        assert!(WorkerError::cancelled().is_cancelled());
        let err = WorkerError::runtime(anyhow::anyhow!("boom"));
        assert_eq!(err.status(), AttemptStatus::Failed);
        assert!(!err.is_cancelled());
    }

    #[test]
    fn partial_attaches_once() {
        let err = WorkerError::destination_write("broken pipe")
            .with_partial(progress(3))
            .with_partial(progress(9));
        assert_eq!(err.partial().unwrap().stats.records_synced, 3);
    }

    #[test]
    fn launch_and_validation_never_carry_partial() {
        let err = WorkerError::Launch(anyhow::anyhow!("no such image")).with_partial(progress(1));
        assert!(err.partial().is_none());
        let err = WorkerError::Validation {
            kind: "StandardSyncInput",
            violations: vec!["missing catalog".into()],
        }
        .with_partial(progress(1));
        assert!(err.partial().is_none());
    }

    #[test]
    fn into_cancelled_keeps_partial() {
        let err = WorkerError::protocol(ConnectorRole::Source, "bad line")
            .with_partial(progress(5))
            .into_cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.partial().unwrap().stats.records_synced, 5);
    }

    #[test]
    fn display_messages() {
        let err = WorkerError::protocol(ConnectorRole::Destination, "unexpected RECORD");
        assert_eq!(
            err.to_string(),
            "protocol violation from destination: unexpected RECORD"
        );
        let err = WorkerError::Validation {
            kind: "NormalizationInput",
            violations: vec!["  - a".into(), "  - b".into()],
        };
        assert_eq!(
            err.to_string(),
            "NormalizationInput validation failed:\n  - a\n  - b"
        );
        let err = WorkerError::Launch(anyhow::anyhow!("docker missing").context("launch source"));
        assert!(err.to_string().contains("launch source"));
        assert!(err.to_string().contains("docker missing"));
    }
}
