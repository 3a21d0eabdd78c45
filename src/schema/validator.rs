//! Payload validator: the JSON-Schema subset this core
//! implements, plus the size/format checks that gate it.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::negotiation::NegotiationReport;
use super::registry::RegistryClient;
use super::SchemaError;
use crate::identifiers::SchemaId;

/// Default maximum payload size: 10 MiB.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// A single validation error, part of the wire error's `details` array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// Validator configuration (the `validation.*` config keys).
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub enabled: bool,
    pub strict_mode: bool,
    pub allow_unknown_props: bool,
    pub max_payload_size: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict_mode: false,
            allow_unknown_props: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Result of validating a payload against a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negotiated_schema: Option<SchemaId>,
}

/// Validates payloads against schema identifiers, using a registry to
/// fetch the schema definition.
pub struct Validator {
    registry: Arc<dyn RegistryClient>,
    config: ValidatorConfig,
}

impl Validator {
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryClient>, config: ValidatorConfig) -> Self {
        Self { registry, config }
    }

    /// Validates `payload_bytes` against the schema at `negotiation.negotiated`.
    pub async fn validate(
        &self,
        payload_bytes: &[u8],
        negotiation: &NegotiationReport,
    ) -> Result<ValidationReport, SchemaError> {
        if !self.config.enabled {
            return Ok(ValidationReport {
                valid: true,
                errors: Vec::new(),
                warnings: Vec::new(),
                negotiated_schema: Some(negotiation.negotiated.clone()),
            });
        }

        if payload_bytes.len() > self.config.max_payload_size {
            return Ok(ValidationReport {
                valid: false,
                errors: vec![ValidationIssue {
                    field: "$".to_string(),
                    code: "PAYLOAD_TOO_LARGE".to_string(),
                    message: format!(
                        "payload of {} bytes exceeds max {} bytes",
                        payload_bytes.len(),
                        self.config.max_payload_size
                    ),
                }],
                warnings: Vec::new(),
                negotiated_schema: Some(negotiation.negotiated.clone()),
            });
        }

        let schema = self.registry.get_schema(&negotiation.negotiated).await?;

        let payload: Value = match serde_json::from_slice(payload_bytes) {
            Ok(value) => value,
            Err(err) => {
                return Ok(ValidationReport {
                    valid: false,
                    errors: vec![ValidationIssue {
                        field: "$".to_string(),
                        code: "INVALID_JSON".to_string(),
                        message: err.to_string(),
                    }],
                    warnings: Vec::new(),
                    negotiated_schema: Some(negotiation.negotiated.clone()),
                });
            }
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        check_value(&payload, &schema.definition, "$", &self.config, &mut errors, &mut warnings);

        Ok(ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            negotiated_schema: Some(negotiation.negotiated.clone()),
        })
    }
}

fn check_value(
    value: &Value,
    schema: &Value,
    path: &str,
    config: &ValidatorConfig,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(type_name) = schema_obj.get("type").and_then(Value::as_str) {
        if !matches_type(value, type_name) {
            errors.push(ValidationIssue {
                field: path.to_string(),
                code: "TYPE_MISMATCH".to_string(),
                message: format!("expected type {type_name}"),
            });
            return;
        }
    }

    if let Some(enum_values) = schema_obj.get("enum").and_then(Value::as_array) {
        if !enum_values.iter().any(|candidate| candidate == value) {
            errors.push(ValidationIssue {
                field: path.to_string(),
                code: "INVALID_ENUM_VALUE".to_string(),
                message: "value is not a member of the declared enum".to_string(),
            });
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = schema_obj.get("minimum").and_then(Value::as_f64) {
            if number < min {
                errors.push(ValidationIssue {
                    field: path.to_string(),
                    code: "VALUE_TOO_SMALL".to_string(),
                    message: format!("value {number} is below minimum {min}"),
                });
            }
        }
        if let Some(max) = schema_obj.get("maximum").and_then(Value::as_f64) {
            if number > max {
                errors.push(ValidationIssue {
                    field: path.to_string(),
                    code: "VALUE_TOO_LARGE".to_string(),
                    message: format!("value {number} is above maximum {max}"),
                });
            }
        }
    }

    if let Some(text) = value.as_str() {
        if let Some(format_name) = schema_obj.get("format").and_then(Value::as_str) {
            if !matches_format(text, format_name) {
                errors.push(ValidationIssue {
                    field: path.to_string(),
                    code: "INVALID_FORMAT".to_string(),
                    message: format!("value does not match format '{format_name}'"),
                });
            }
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    errors.push(ValidationIssue {
                        field: format!("{path}.{key}"),
                        code: "REQUIRED_FIELD_MISSING".to_string(),
                        message: format!("missing required field '{key}'"),
                    });
                }
            }
        }

        if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
            for (key, sub_value) in object {
                let field_path = format!("{path}.{key}");
                if let Some(sub_schema) = properties.get(key) {
                    check_value(sub_value, sub_schema, &field_path, config, errors, warnings);
                } else if config.strict_mode && !config.allow_unknown_props {
                    warnings.push(ValidationIssue {
                        field: field_path,
                        code: "UNKNOWN_PROPERTY".to_string(),
                        message: format!("unexpected property '{key}'"),
                    });
                }
            }
        }
    }

    if let Some(array) = value.as_array() {
        if let Some(item_schema) = schema_obj.get("items") {
            for (index, item) in array.iter().enumerate() {
                let field_path = format!("{path}[{index}]");
                check_value(item, item_schema, &field_path, config, errors, warnings);
            }
        }
    }
}

fn matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.as_f64().is_some_and(|n| n.fract() == 0.0),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

fn matches_format(text: &str, format_name: &str) -> bool {
    match format_name {
        "email" => text.contains('@') && text.contains('.'),
        "uri" => text.starts_with("http://") || text.starts_with("https://"),
        "date" => DATE_RE.is_match(text),
        "date-time" => DateTime::parse_from_rfc3339(text).is_ok(),
        _ => true, // unknown formats pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::{Schema, SchemaMetadata};
    use crate::schema::registry::MockRegistryClient;
    use chrono::Utc;

    async fn registry_with(schema_json: Value) -> Arc<MockRegistryClient> {
        let registry = Arc::new(MockRegistryClient::new());
        let schema = Schema {
            id: SchemaId::new("commerce", "order", 1),
            definition: schema_json,
            published_at: Utc::now(),
            signature: None,
        };
        let metadata = SchemaMetadata::from_schema(&schema);
        registry.register_schema(schema, metadata).await.unwrap();
        registry
    }

    fn negotiation() -> NegotiationReport {
        NegotiationReport {
            requested: SchemaId::new("commerce", "order", 1),
            negotiated: SchemaId::new("commerce", "order", 1),
            exact_match: true,
        }
    }

    #[tokio::test]
    async fn missing_required_field_is_reported_with_dotted_path() {
        let registry = registry_with(serde_json::json!({
            "type": "object",
            "required": ["order_id"]
        }))
        .await;
        let validator = Validator::new(registry, ValidatorConfig::default());
        let report = validator
            .validate(br#"{"amount":100}"#, &negotiation())
            .await
            .unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors[0].field, "$.order_id");
        assert_eq!(report.errors[0].code, "REQUIRED_FIELD_MISSING");
    }

    #[tokio::test]
    async fn valid_payload_passes() {
        let registry = registry_with(serde_json::json!({
            "type": "object",
            "required": ["order_id"]
        }))
        .await;
        let validator = Validator::new(registry, ValidatorConfig::default());
        let report = validator
            .validate(br#"{"order_id":"abc"}"#, &negotiation())
            .await
            .unwrap();
        assert!(report.valid);
    }

    #[tokio::test]
    async fn format_email_checked() {
        let registry = registry_with(serde_json::json!({
            "type": "object",
            "properties": {"contact": {"type": "string", "format": "email"}}
        }))
        .await;
        let validator = Validator::new(registry, ValidatorConfig::default());
        let report = validator
            .validate(br#"{"contact":"not-an-email"}"#, &negotiation())
            .await
            .unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors[0].code, "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn oversized_payload_rejected_before_parsing() {
        let registry = registry_with(serde_json::json!({"type": "object"})).await;
        let mut config = ValidatorConfig::default();
        config.max_payload_size = 4;
        let validator = Validator::new(registry, config);
        let report = validator.validate(b"{\"a\":1}", &negotiation()).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors[0].code, "PAYLOAD_TOO_LARGE");
    }
}
