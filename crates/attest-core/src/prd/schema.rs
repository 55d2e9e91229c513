//! JSON Schema validation for PRDs.
//!
//! PRDs are validated against `schema/prd.schema.json`, embedded at
//! compile time.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded PRD schema (loaded at compile time).
const PRD_SCHEMA_JSON: &str = include_str!("../../schema/prd.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(PRD_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a PRD JSON value against the schema.
///
/// Returns every validation error, not only the first.
pub fn validate_prd_schema(prd_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(prd_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_prd_passes_schema() {
        let value = serde_json::json!({
            "name": "checkout",
            "stories": [
                {"id": "A", "title": "Login works", "gateFile": "gates/login.yaml"},
                {
                    "id": "B",
                    "title": "Checkout works",
                    "gateFile": "gates/checkout.yaml",
                    "dependsOn": ["A"],
                    "scope": {"allowedPaths": ["src/**"], "maxChangedFiles": 3}
                }
            ]
        });
        assert!(validate_prd_schema(&value).is_ok());
    }

    #[test]
    fn test_missing_gate_file_fails() {
        let value = serde_json::json!({
            "stories": [{"id": "A", "title": "No gate"}]
        });
        let errors = validate_prd_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_unknown_field_fails() {
        let value = serde_json::json!({
            "stories": [{"id": "A", "title": "t", "gateFile": "g", "dependson": ["B"]}]
        });
        assert!(validate_prd_schema(&value).is_err());
    }

    #[test]
    fn test_bad_authority_fails() {
        let value = serde_json::json!({
            "defaultAuthority": "yolo",
            "stories": []
        });
        assert!(validate_prd_schema(&value).is_err());
    }
}
