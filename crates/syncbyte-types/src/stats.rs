//! Attempt status and replication statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record and byte counts for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub records: u64,
    pub bytes: u64,
}

/// Aggregate statistics for one replication run.
///
/// Stream keys are the stream names emitted by the source, before any
/// namespace prefix is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub records_synced: u64,
    pub bytes_synced: u64,
    pub state_messages: u64,
    /// State messages echoed back by the destination after committing.
    pub destination_state_acks: u64,
    pub streams: BTreeMap<String, StreamStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl SyncStats {
    /// Records observed for `stream`; zero for unknown streams.
    #[must_use]
    pub fn records(&self, stream: &str) -> u64 {
        self.streams.get(stream).map_or(0, |s| s.records)
    }

    #[must_use]
    pub fn bytes(&self, stream: &str) -> u64 {
        self.streams.get(stream).map_or(0, |s| s.bytes)
    }

    /// Wall-clock duration when both timestamps are known.
    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.ended_at?);
        #[allow(clippy::cast_precision_loss)]
        let secs = (end - start).num_milliseconds() as f64 / 1000.0;
        Some(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_status_as_str() {
        assert_eq!(AttemptStatus::Succeeded.as_str(), "succeeded");
        assert_eq!(AttemptStatus::Failed.to_string(), "failed");
        assert_eq!(
            serde_json::to_string(&AttemptStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn unknown_stream_counts_are_zero() {
        let stats = SyncStats::default();
        assert_eq!(stats.records("users"), 0);
        assert_eq!(stats.bytes("users"), 0);
        assert!(stats.duration_secs().is_none());
    }

    #[test]
    fn duration_from_timestamps() {
        let start = Utc::now();
        let stats = SyncStats {
            started_at: Some(start),
            ended_at: Some(start + chrono::Duration::milliseconds(1500)),
            ..SyncStats::default()
        };
        assert_eq!(stats.duration_secs(), Some(1.5));
    }
}
