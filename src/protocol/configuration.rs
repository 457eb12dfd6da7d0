//! Runtime configuration negotiation model.
//!
//! A plugin instance declares a schema ([`ConfigurationRequest`]) and the
//! coordinator answers with values ([`ConfigurationResponse`]).

use serde::{Deserialize, Serialize};

/// Placeholder printed instead of masked values
pub const REDACTED: &str = "***";

/// Value type of a configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// true/false
    Boolean,
    /// Free text
    String,
    /// Numeric value
    Number,
}

/// One configurable option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationField {
    /// Field name
    pub name: String,
    /// Value type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Default value, as text
    pub default_value: String,
    /// Whether the coordinator may omit the field
    pub optional: bool,
    /// Human-readable hint
    pub hint: String,
    /// Secret value: never logged, obscured in UIs
    pub mask: bool,
}

impl ConfigurationField {
    /// Create a required field of the given type
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default_value: String::new(),
            optional: false,
            hint: String::new(),
            mask: false,
        }
    }

    /// Required string field
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    /// Required boolean field
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// Required number field
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    /// Set the default value
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = value.into();
        self
    }

    /// Set the hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    /// Mark as optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark as secret
    pub fn masked(mut self) -> Self {
        self.mask = true;
        self
    }
}

/// Schema sent once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRequest {
    /// Declared fields
    pub fields: Vec<ConfigurationField>,
}

impl ConfigurationRequest {
    /// Create a request from fields
    pub fn new(fields: Vec<ConfigurationField>) -> Self {
        Self { fields }
    }

    /// Look up a declared field
    pub fn field(&self, name: &str) -> Option<&ConfigurationField> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn is_masked(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.mask)
    }
}

/// One negotiated value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Field name
    pub name: String,
    /// Value, as text
    pub value: String,
}

/// The coordinator's answer to a [`ConfigurationRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationResponse {
    /// Values by field name
    pub field_values: Vec<FieldValue>,
}

impl ConfigurationResponse {
    /// Get a value by field name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.field_values
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Names of required fields the coordinator did not answer
    pub fn missing_required<'a>(&self, request: &'a ConfigurationRequest) -> Vec<&'a str> {
        request
            .fields
            .iter()
            .filter(|f| !f.optional && self.get(&f.name).is_none())
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Copy safe to print: values of masked fields are replaced
    pub fn redacted(&self, request: &ConfigurationRequest) -> Self {
        Self {
            field_values: self
                .field_values
                .iter()
                .map(|f| FieldValue {
                    name: f.name.clone(),
                    value: if request.is_masked(&f.name) {
                        REDACTED.to_string()
                    } else {
                        f.value.clone()
                    },
                })
                .collect(),
        }
    }

    /// Field names, for logging
    pub fn field_names(&self) -> Vec<&str> {
        self.field_values.iter().map(|f| f.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigurationRequest {
        ConfigurationRequest::new(vec![
            ConfigurationField::string("token").masked().with_hint("Bot token"),
            ConfigurationField::boolean("nsfw").with_default("false").optional(),
            ConfigurationField::number("rate"),
        ])
    }

    #[test]
    fn test_field_wire_format() {
        let value = serde_json::to_value(ConfigurationField::string("token").masked()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "token",
                "type": "STRING",
                "defaultValue": "",
                "optional": false,
                "hint": "",
                "mask": true
            })
        );
    }

    #[test]
    fn test_response_lookup() {
        let response: ConfigurationResponse = serde_json::from_value(json!({
            "fieldValues": [{ "name": "token", "value": "abc" }]
        }))
        .unwrap();
        assert_eq!(response.get("token"), Some("abc"));
        assert_eq!(response.get("rate"), None);
    }

    #[test]
    fn test_missing_required_skips_optional() {
        let response = ConfigurationResponse {
            field_values: vec![FieldValue {
                name: "token".into(),
                value: "abc".into(),
            }],
        };
        assert_eq!(response.missing_required(&schema()), vec!["rate"]);
    }

    #[test]
    fn test_redacted_hides_masked_only() {
        let response = ConfigurationResponse {
            field_values: vec![
                FieldValue {
                    name: "token".into(),
                    value: "s3cret".into(),
                },
                FieldValue {
                    name: "rate".into(),
                    value: "5".into(),
                },
            ],
        };
        let safe = response.redacted(&schema());
        assert_eq!(safe.get("token"), Some(REDACTED));
        assert_eq!(safe.get("rate"), Some("5"));
        assert_eq!(response.get("token"), Some("s3cret"));
    }
}
