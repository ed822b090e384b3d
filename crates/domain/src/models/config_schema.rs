//! Widget configuration schema models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Field name -> descriptor.
pub type ConfigSchema = BTreeMap<String, FieldDescriptor>;

/// Supported configuration field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Boolean,
    Select,
    Multiselect,
    Json,
    Color,
    Date,
    Email,
    Url,
}

impl FieldType {
    pub fn all() -> &'static [FieldType] {
        &[
            FieldType::Text,
            FieldType::Textarea,
            FieldType::Number,
            FieldType::Boolean,
            FieldType::Select,
            FieldType::Multiselect,
            FieldType::Json,
            FieldType::Color,
            FieldType::Date,
            FieldType::Email,
            FieldType::Url,
        ]
    }

    /// Select-like types must declare options.
    pub fn requires_options(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::Multiselect)
    }

    /// Types whose values are strings subject to length bounds.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            FieldType::Text | FieldType::Textarea | FieldType::Email | FieldType::Url
        )
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "string" => Ok(FieldType::Text),
            "textarea" => Ok(FieldType::Textarea),
            "number" | "integer" | "float" => Ok(FieldType::Number),
            "boolean" | "bool" | "checkbox" => Ok(FieldType::Boolean),
            "select" => Ok(FieldType::Select),
            "multiselect" => Ok(FieldType::Multiselect),
            "json" => Ok(FieldType::Json),
            "color" => Ok(FieldType::Color),
            "date" => Ok(FieldType::Date),
            "email" => Ok(FieldType::Email),
            "url" => Ok(FieldType::Url),
            _ => Err(format!("Unsupported field type: {}", s)),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Text => write!(f, "text"),
            FieldType::Textarea => write!(f, "textarea"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Select => write!(f, "select"),
            FieldType::Multiselect => write!(f, "multiselect"),
            FieldType::Json => write!(f, "json"),
            FieldType::Color => write!(f, "color"),
            FieldType::Date => write!(f, "date"),
            FieldType::Email => write!(f, "email"),
            FieldType::Url => write!(f, "url"),
        }
    }
}

/// An option of a select or multiselect field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldOption {
    Labeled { value: Value, label: String },
    Plain(Value),
}

impl FieldOption {
    pub fn value(&self) -> &Value {
        match self {
            FieldOption::Labeled { value, .. } => value,
            FieldOption::Plain(value) => value,
        }
    }

    pub fn label(&self) -> String {
        match self {
            FieldOption::Labeled { label, .. } => label.clone(),
            FieldOption::Plain(value) => value_key(value),
        }
    }
}

impl From<&str> for FieldOption {
    fn from(value: &str) -> Self {
        FieldOption::Plain(Value::String(value.to_string()))
    }
}

/// String form of a scalar used for loose option comparison (`5` == `"5"`).
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Descriptor of one configuration field.
///
/// `type` is kept as the raw declared string so that a missing or unknown type
/// can be reported by schema validation instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FieldDescriptor {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Extra rendering-side validation rules, passed through to forms.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation: Vec<String>,
    #[serde(default)]
    pub sort_order: i32,
}

impl FieldDescriptor {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type: Some(field_type.to_string()),
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|o| FieldOption::from(*o)).collect());
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_length(mut self, min_length: Option<usize>, max_length: Option<usize>) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    /// Parsed field type, `None` when missing or unsupported.
    pub fn kind(&self) -> Option<FieldType> {
        self.field_type.as_deref().and_then(|t| t.parse().ok())
    }

    /// Declared label, or the field name in title case.
    pub fn label_or(&self, name: &str) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => humanize(name),
        }
    }

    /// Whether `value` is one of the declared options.
    pub fn allows(&self, value: &Value) -> bool {
        match &self.options {
            Some(options) => {
                let key = value_key(value);
                options
                    .iter()
                    .any(|o| o.value() == value || value_key(o.value()) == key)
            }
            None => true,
        }
    }
}

/// `refresh_interval` -> `Refresh interval`.
fn humanize(name: &str) -> String {
    let spaced = name.replace(['_', '-'], " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_type_parse() {
        assert_eq!("select".parse::<FieldType>().unwrap(), FieldType::Select);
        assert_eq!("MultiSelect".parse::<FieldType>().unwrap(), FieldType::Multiselect);
        assert_eq!("integer".parse::<FieldType>().unwrap(), FieldType::Number);
        assert!("slider".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_field_type_display_roundtrip() {
        for t in FieldType::all() {
            assert_eq!(t.to_string().parse::<FieldType>().unwrap(), *t);
        }
    }

    #[test]
    fn test_descriptor_deserialize() {
        let schema: ConfigSchema = serde_json::from_value(json!({
            "chart_type": {
                "type": "select",
                "label": "Chart type",
                "required": true,
                "options": ["line", {"value": "bar", "label": "Bar chart"}],
                "default": "line"
            },
            "refresh_interval": {"type": "number", "min": 5, "max": 3600},
            "untyped": {"label": "No type"}
        }))
        .unwrap();

        let chart = &schema["chart_type"];
        assert_eq!(chart.kind(), Some(FieldType::Select));
        assert!(chart.required);
        assert_eq!(chart.options.as_ref().unwrap()[1].label(), "Bar chart");
        assert_eq!(schema["refresh_interval"].max, Some(3600.0));
        assert_eq!(schema["untyped"].kind(), None);
    }

    #[test]
    fn test_allows_loose_comparison() {
        let field: FieldDescriptor = serde_json::from_value(json!({
            "type": "select",
            "options": [5, 10, "all"]
        }))
        .unwrap();
        assert!(field.allows(&json!(5)));
        assert!(field.allows(&json!("10")));
        assert!(field.allows(&json!("all")));
        assert!(!field.allows(&json!("none")));
    }

    #[test]
    fn test_label_or_humanizes() {
        let field = FieldDescriptor::new(FieldType::Number);
        assert_eq!(field.label_or("refresh_interval"), "Refresh interval");
        assert_eq!(field.with_label("Refresh").label_or("refresh_interval"), "Refresh");
    }
}
