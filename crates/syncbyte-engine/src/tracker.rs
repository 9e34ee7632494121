//! Per-attempt accumulation of record counts and the latest state.

use syncbyte_types::protocol::{ProtocolMessage, State};
use syncbyte_types::stats::SyncStats;

use crate::error::PartialProgress;

/// Observes every replicated message of one attempt.
///
/// Owned by a single replication worker; not shared across attempts.
#[derive(Debug, Default)]
pub struct MessageTracker {
    stats: SyncStats,
    latest_state: Option<State>,
}

impl MessageTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message. Non-replicated kinds are ignored.
    pub fn observe(&mut self, message: &ProtocolMessage) {
        match message {
            ProtocolMessage::Record(record) => {
                let bytes = serialized_len(&record.data);
                let stream = self.stats.streams.entry(record.stream.clone()).or_default();
                stream.records += 1;
                stream.bytes += bytes;
                self.stats.records_synced += 1;
                self.stats.bytes_synced += bytes;
            }
            ProtocolMessage::State(state) => {
                self.stats.state_messages += 1;
                self.latest_state = Some(state.clone());
            }
            _ => {}
        }
    }

    /// Count state messages the destination echoed after committing.
    pub fn observe_destination_acks(&mut self, count: u64) {
        self.stats.destination_state_acks += count;
    }

    #[must_use]
    pub fn latest_state(&self) -> Option<&State> {
        self.latest_state.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Copy of the progress so far, valid at any point of the stream.
    #[must_use]
    pub fn snapshot(&self) -> PartialProgress {
        PartialProgress {
            stats: self.stats.clone(),
            state: self.latest_state.clone(),
        }
    }

    /// Consume the tracker once the stream has closed.
    #[must_use]
    pub fn finalize(self) -> (Option<State>, SyncStats) {
        (self.latest_state, self.stats)
    }
}

fn serialized_len(value: &serde_json::Value) -> u64 {
    // Serializing a `Value` cannot fail.
    serde_json::to_vec(value).map_or(0, |bytes| bytes.len() as u64)
}
