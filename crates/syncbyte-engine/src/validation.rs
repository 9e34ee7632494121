//! JSON Schema validation of attempt inputs.
//!
//! Every worker input is checked before any connector is launched. All
//! violations are collected and reported together.

use anyhow::Context;
use serde::Serialize;

use syncbyte_types::sync::{NormalizationInput, StandardSyncInput};

use crate::error::WorkerError;

/// An input type with an embedded JSON Schema.
pub trait ValidatedInput: Serialize {
    /// Name used in validation messages.
    const KIND: &'static str;
    const SCHEMA: &'static str;
}

impl ValidatedInput for StandardSyncInput {
    const KIND: &'static str = "StandardSyncInput";
    const SCHEMA: &'static str = include_str!("schemas/standard_sync_input.json");
}

impl ValidatedInput for NormalizationInput {
    const KIND: &'static str = "NormalizationInput";
    const SCHEMA: &'static str = include_str!("schemas/normalization_input.json");
}

/// Validate `input` against its schema.
///
/// # Errors
///
/// Returns [`WorkerError::Validation`] listing every violation, or
/// [`WorkerError::Runtime`] if the input cannot be serialized or the schema
/// itself is broken.
pub fn validate<T: ValidatedInput>(input: &T) -> Result<(), WorkerError> {
    let schema: serde_json::Value = serde_json::from_str(T::SCHEMA)
        .with_context(|| format!("embedded {} schema is not valid JSON", T::KIND))
        .map_err(WorkerError::runtime)?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| anyhow::anyhow!("embedded {} schema is invalid: {e}", T::KIND))
        .map_err(WorkerError::runtime)?;
    let instance = serde_json::to_value(input)
        .with_context(|| format!("failed to serialize {}", T::KIND))
        .map_err(WorkerError::runtime)?;

    let violations: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("  - {e}"))
        .collect();

    if !violations.is_empty() {
        return Err(WorkerError::Validation {
            kind: T::KIND,
            violations,
        });
    }

    tracing::debug!(kind = T::KIND, "Input schema validation passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use syncbyte_types::catalog::ConfiguredCatalog;

    fn catalog(stream_name: &str) -> ConfiguredCatalog {
        serde_json::from_value(json!({
            "streams": [{
                "stream": {"name": stream_name, "json_schema": {"type": "object"}},
                "sync_mode": "full_refresh",
                "destination_sync_mode": "overwrite"
            }]
        }))
        .unwrap()
    }

    fn sync_input() -> StandardSyncInput {
        StandardSyncInput {
            source_configuration: json!({"host": "src"}),
            destination_configuration: json!({"host": "dst"}),
            catalog: catalog("users"),
            namespace_prefix: Some("ab_".into()),
            state: None,
        }
    }

    #[test]
    fn valid_sync_input_passes() {
        validate(&sync_input()).unwrap();
    }

    #[test]
    fn non_object_configuration_is_rejected() {
        let mut input = sync_input();
        input.source_configuration = json!("not an object");
        let err = validate(&input).unwrap_err();
        match err {
            WorkerError::Validation { kind, violations } => {
                assert_eq!(kind, "StandardSyncInput");
                assert_eq!(violations.len(), 1);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn every_violation_is_reported() {
        let mut input = sync_input();
        input.source_configuration = json!(null);
        input.destination_configuration = json!([]);
        input.catalog = catalog("");
        let WorkerError::Validation { violations, .. } = validate(&input).unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn normalization_input_validated_with_its_own_schema() {
        let input = NormalizationInput {
            destination_configuration: json!(42),
            catalog: catalog("ab_users"),
        };
        let err = validate(&input).unwrap_err();
        assert!(err.to_string().starts_with("NormalizationInput validation failed"));

        let input = NormalizationInput {
            destination_configuration: json!({}),
            catalog: catalog("ab_users"),
        };
        validate(&input).unwrap();
    }
}
