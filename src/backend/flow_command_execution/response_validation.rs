use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::backend::common::errors::{BridgeError, CommandResult, ShapeViolation};

const MAX_ACTUAL_CHARS: usize = 160;

/// Expected shape of a flowctl response, backed by a compiled JSON schema.
#[derive(Clone, Default)]
pub struct ResponseShape {
    schema: Option<Arc<(Value, JSONSchema)>>,
}

impl fmt::Debug for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseShape")
            .field("schema", &self.schema.as_ref().map(|compiled| &compiled.0))
            .finish()
    }
}

impl ResponseShape {
    /// Accepts any well-formed JSON document.
    pub fn any() -> Self {
        Self { schema: None }
    }

    pub fn from_schema(schema: Value) -> Result<Self, String> {
        let compiled = JSONSchema::compile(&schema)
            .map_err(|error| format!("Invalid response schema: {error}"))?;
        Ok(Self {
            schema: Some(Arc::new((schema, compiled))),
        })
    }

    /// flowctl's `--json` envelope: an object with a boolean `success` flag.
    pub fn success_envelope() -> Self {
        Self::object_with(&[("success", "boolean")])
    }

    /// An object that must carry each `(field, json type)` pair.
    pub fn object_with(fields: &[(&str, &str)]) -> Self {
        let required = fields.iter().map(|(name, _)| *name).collect::<Vec<_>>();
        let properties = fields
            .iter()
            .map(|(name, kind)| (name.to_string(), serde_json::json!({ "type": kind })))
            .collect::<serde_json::Map<_, _>>();
        let schema = serde_json::json!({
            "type": "object",
            "required": required,
            "properties": properties,
        });

        match Self::from_schema(schema) {
            Ok(shape) => shape,
            Err(_) => Self::any(),
        }
    }

    fn check(&self, value: &Value) -> Vec<ShapeViolation> {
        let Some(compiled) = self.schema.as_ref() else {
            return Vec::new();
        };
        let (schema, validator) = compiled.as_ref();

        let Err(errors) = validator.validate(value) else {
            return Vec::new();
        };

        errors
            .map(|error| {
                let schema_path = error.schema_path.to_string();
                let expected = schema
                    .pointer(&schema_path)
                    .map(|rule| {
                        let keyword = schema_path.rsplit('/').next().unwrap_or_default();
                        format!("{keyword}: {rule}")
                    })
                    .unwrap_or_else(|| error.to_string());

                ShapeViolation {
                    path: error.instance_path.to_string(),
                    expected,
                    actual: render_actual(&error.instance),
                }
            })
            .collect()
    }
}

/// Parses captured stdout and checks it against `shape`. Nothing is accepted
/// partially: any parse failure or violation rejects the whole payload.
pub fn validate_response(raw: &[u8], shape: &ResponseShape, snippet_limit: usize) -> CommandResult {
    let value = serde_json::from_slice::<Value>(raw).map_err(|error| {
        BridgeError::MalformedOutput {
            message: error.to_string(),
            snippet: output_snippet(raw, snippet_limit),
        }
    })?;

    let violations = shape.check(&value);
    if !violations.is_empty() {
        return Err(BridgeError::SchemaViolation { violations });
    }

    Ok(value)
}

pub(crate) fn output_snippet(raw: &[u8], limit: usize) -> String {
    let head = &raw[..raw.len().min(limit)];
    let text = String::from_utf8_lossy(head);
    let mut end = text.len().min(limit);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn render_actual(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() <= MAX_ACTUAL_CHARS {
        return rendered;
    }
    let prefix = rendered.chars().take(MAX_ACTUAL_CHARS).collect::<String>();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_matching_envelope() {
        let value = validate_response(
            br#"{"success": true, "epics": []}"#,
            &ResponseShape::success_envelope(),
            500,
        )
        .unwrap();
        assert_eq!(value["epics"], serde_json::json!([]));
    }

    #[test]
    fn malformed_output_carries_bounded_snippet() {
        let raw = format!("Traceback {}", "x".repeat(4000));
        let error = validate_response(raw.as_bytes(), &ResponseShape::any(), 500).unwrap_err();
        match error {
            BridgeError::MalformedOutput { snippet, .. } => {
                assert_eq!(snippet.len(), 500);
                assert!(snippet.starts_with("Traceback"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_output_is_malformed() {
        let error = validate_response(b"", &ResponseShape::any(), 500).unwrap_err();
        assert_eq!(error.kind(), "malformedOutput");
    }

    #[test]
    fn reports_field_level_violations() {
        let error = validate_response(
            br#"{"success": "yes"}"#,
            &ResponseShape::success_envelope(),
            500,
        )
        .unwrap_err();
        let BridgeError::SchemaViolation { violations } = error else {
            panic!("expected schema violation");
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/success");
        assert_eq!(violations[0].expected, "type: \"boolean\"");
        assert_eq!(violations[0].actual, "\"yes\"");
    }

    #[test]
    fn reports_missing_required_field_at_root() {
        let error = validate_response(br#"{"epics": []}"#, &ResponseShape::success_envelope(), 500)
            .unwrap_err();
        let BridgeError::SchemaViolation { violations } = error else {
            panic!("expected schema violation");
        };
        assert_eq!(violations[0].path, "");
        assert!(violations[0].expected.starts_with("required"));
    }

    #[test]
    fn snippet_never_splits_a_character() {
        let raw = "é".repeat(10);
        let snippet = output_snippet(raw.as_bytes(), 5);
        assert_eq!(snippet, "éé");
    }
}
