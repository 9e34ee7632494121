//! Configured catalog types.
//!
//! A [`ConfiguredCatalog`] is the stream-selection contract for one sync: which
//! streams the source reads and how the destination writes them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    Append,
    Overwrite,
    AppendDedup,
}

/// A stream as declared by the source connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// JSON Schema of the stream's records.
    #[serde(default)]
    pub json_schema: serde_json::Value,
    #[serde(default)]
    pub supported_sync_modes: Vec<SyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_defined_cursor: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_cursor_field: Vec<String>,
}

/// A stream selected for sync, with its read and write modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    pub stream: Stream,
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cursor_field: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    /// Names of every configured stream, in catalog order.
    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().map(|s| s.stream.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_catalog_from_json() {
        let json = serde_json::json!({
            "streams": [{
                "stream": {
                    "name": "users",
                    "json_schema": {"type": "object"},
                    "supported_sync_modes": ["full_refresh", "incremental"]
                },
                "sync_mode": "incremental",
                "destination_sync_mode": "append_dedup",
                "cursor_field": ["updated_at"],
                "primary_key": [["id"]]
            }]
        });
        let catalog: ConfiguredCatalog = serde_json::from_value(json).unwrap();
        assert_eq!(catalog.streams.len(), 1);
        let stream = &catalog.streams[0];
        assert_eq!(stream.sync_mode, SyncMode::Incremental);
        assert_eq!(stream.destination_sync_mode, DestinationSyncMode::AppendDedup);
        assert_eq!(stream.primary_key, vec![vec!["id".to_string()]]);
        assert_eq!(catalog.stream_names().collect::<Vec<_>>(), vec!["users"]);
    }

    #[test]
    fn optional_fields_skipped() {
        let stream = Stream {
            name: "orders".into(),
            namespace: None,
            json_schema: serde_json::json!({}),
            supported_sync_modes: vec![SyncMode::FullRefresh],
            source_defined_cursor: None,
            default_cursor_field: vec![],
        };
        let json = serde_json::to_value(&stream).unwrap();
        assert!(json.get("namespace").is_none());
        assert!(json.get("default_cursor_field").is_none());
    }
}
