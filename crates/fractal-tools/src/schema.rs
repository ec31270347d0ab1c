//! JSON Schema (draft 2020-12) validation of tool arguments, ahead of
//! dispatch (C3 §4.3).

use jsonschema::JSONSchema;
use serde_json::Value;

/// One field-level validation failure, rendered close to `jsonschema`'s
/// own error format so messages stay stable across schema changes.
#[derive(Debug, Clone)]
pub struct ValidationFailure {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate `args` against `schema`. Returns the list of failures (empty
/// means valid). A schema that fails to compile is treated as "accept
/// anything" with a single failure describing the compile error, so a
/// malformed tool schema never silently blocks every call.
pub fn validate(schema: &Value, args: &Value) -> Vec<ValidationFailure> {
    let compiled = match JSONSchema::compile(schema) {
        Ok(c) => c,
        Err(e) => return vec![ValidationFailure { path: "$".to_string(), message: format!("invalid schema: {e}") }],
    };

    match compiled.validate(args) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| ValidationFailure { path: e.instance_path.to_string(), message: e.to_string() })
            .collect(),
    }
}

pub fn is_valid(schema: &Value, args: &Value) -> bool {
    validate(schema, args).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_matching_arguments() {
        let schema = json!({"type": "object", "required": ["path"], "properties": {"path": {"type": "string"}}});
        assert!(is_valid(&schema, &json!({"path": "/tmp/x"})));
    }

    #[test]
    fn rejects_missing_required_field() {
        let schema = json!({"type": "object", "required": ["path"], "properties": {"path": {"type": "string"}}});
        let failures = validate(&schema, &json!({}));
        assert!(!failures.is_empty());
    }

    #[test]
    fn rejects_wrong_type() {
        let schema = json!({"type": "object", "properties": {"count": {"type": "integer"}}});
        assert!(!is_valid(&schema, &json!({"count": "five"})));
    }
}
