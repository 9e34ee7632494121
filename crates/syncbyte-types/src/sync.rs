//! Sync input and output contracts exchanged between the orchestrator and its
//! activities.

use serde::{Deserialize, Serialize};

use crate::catalog::ConfiguredCatalog;
use crate::protocol::State;
use crate::stats::SyncStats;

/// Full description of one sync attempt's intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardSyncInput {
    pub source_configuration: serde_json::Value,
    pub destination_configuration: serde_json::Value,
    pub catalog: ConfiguredCatalog,
    /// Prepended to every stream name written to the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_prefix: Option<String>,
    /// Checkpoint from a previous attempt, handed to the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

/// Result of the replication phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardSyncOutput {
    /// Catalog as presented to the destination; handed to normalization.
    pub output_catalog: ConfiguredCatalog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    pub stats: SyncStats,
}

/// Input of the normalization phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationInput {
    pub destination_configuration: serde_json::Value,
    pub catalog: ConfiguredCatalog,
}

impl NormalizationInput {
    /// Pair the attempt's destination config with replication's output catalog.
    #[must_use]
    pub fn from_replication(input: &StandardSyncInput, output: &StandardSyncOutput) -> Self {
        Self {
            destination_configuration: input.destination_configuration.clone(),
            catalog: output.output_catalog.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ConfiguredStream, DestinationSyncMode, Stream, SyncMode};

    fn catalog(name: &str) -> ConfiguredCatalog {
        ConfiguredCatalog {
            streams: vec![ConfiguredStream {
                stream: Stream {
                    name: name.into(),
                    namespace: None,
                    json_schema: serde_json::json!({"type": "object"}),
                    supported_sync_modes: vec![SyncMode::FullRefresh],
                    source_defined_cursor: None,
                    default_cursor_field: vec![],
                },
                sync_mode: SyncMode::FullRefresh,
                destination_sync_mode: DestinationSyncMode::Overwrite,
                cursor_field: vec![],
                primary_key: vec![],
            }],
        }
    }

    #[test]
    fn normalization_input_uses_output_catalog() {
        let input = StandardSyncInput {
            source_configuration: serde_json::json!({}),
            destination_configuration: serde_json::json!({"host": "db"}),
            catalog: catalog("users"),
            namespace_prefix: Some("ab_".into()),
            state: None,
        };
        let output = StandardSyncOutput {
            output_catalog: catalog("ab_users"),
            state: None,
            stats: SyncStats::default(),
        };
        let normalization = NormalizationInput::from_replication(&input, &output);
        assert_eq!(normalization.destination_configuration["host"], "db");
        assert_eq!(normalization.catalog, output.output_catalog);
    }

    #[test]
    fn sync_input_optional_fields_default() {
        let json = serde_json::json!({
            "source_configuration": {},
            "destination_configuration": {},
            "catalog": {"streams": []}
        });
        let input: StandardSyncInput = serde_json::from_value(json).unwrap();
        assert!(input.namespace_prefix.is_none());
        assert!(input.state.is_none());
    }
}
