//! Configuration schema validation, sanitization and form generation.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::models::config_schema::value_key;
use crate::models::{ConfigSchema, FieldDescriptor, FieldOption, FieldType};
use shared::validation::{
    error_message, validate_email_value, validate_hex_color, validate_iso_date,
    validate_url_value,
};

/// Field name -> messages. Empty when valid.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// One renderable form field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub current_value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    pub validation: Vec<String>,
    pub attributes: BTreeMap<String, Value>,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigSchemaValidator;

impl ConfigSchemaValidator {
    pub fn new() -> Self {
        Self
    }

    /// Structural problems with a schema declaration.
    pub fn validate_configuration_schema(&self, schema: &ConfigSchema) -> FieldErrors {
        let mut errors = FieldErrors::new();

        for (name, field) in schema {
            let mut messages = Vec::new();

            let kind = match field.field_type.as_deref() {
                None => {
                    messages.push("Field type is required".to_string());
                    None
                }
                Some(raw) => match raw.parse::<FieldType>() {
                    Ok(kind) => Some(kind),
                    Err(e) => {
                        messages.push(e);
                        None
                    }
                },
            };

            if let Some(kind) = kind {
                if kind.requires_options()
                    && field.options.as_ref().map_or(true, |o| o.is_empty())
                {
                    messages.push(format!("Options are required for {} fields", kind));
                }
            }

            if let (Some(min), Some(max)) = (field.min, field.max) {
                if min > max {
                    messages.push(format!(
                        "min ({}) must not exceed max ({})",
                        format_number(min),
                        format_number(max)
                    ));
                }
            }
            if let (Some(min), Some(max)) = (field.min_length, field.max_length) {
                if min > max {
                    messages.push(format!(
                        "min_length ({}) must not exceed max_length ({})",
                        min, max
                    ));
                }
            }

            if messages.is_empty() {
                if let (Some(kind), Some(default)) = (kind, &field.default) {
                    if !default.is_null() {
                        for e in check_value(kind, name, field, default) {
                            messages.push(format!("Default value is invalid: {}", e));
                        }
                    }
                }
            }

            if !messages.is_empty() {
                errors.insert(name.clone(), messages);
            }
        }

        errors
    }

    /// Validates user-supplied values. Keys absent from the schema are ignored.
    pub fn validate_user_widget_config(
        &self,
        schema: &ConfigSchema,
        config: &Map<String, Value>,
    ) -> FieldErrors {
        let mut errors = FieldErrors::new();

        for (name, field) in schema {
            let label = field.label_or(name);
            let messages = match config.get(name) {
                value if is_blank(value) => {
                    if field.required {
                        vec![format!("{} is required", label)]
                    } else {
                        Vec::new()
                    }
                }
                Some(value) => match field.kind() {
                    Some(kind) => check_value(kind, name, field, value),
                    None => Vec::new(),
                },
                None => Vec::new(),
            };

            if !messages.is_empty() {
                errors.insert(name.clone(), messages);
            }
        }

        errors
    }

    /// Coerces values to their declared types and drops unknown keys.
    ///
    /// Applying it twice gives the same result as applying it once.
    pub fn sanitize(&self, schema: &ConfigSchema, config: &Map<String, Value>) -> Map<String, Value> {
        let mut sanitized = Map::new();
        for (name, field) in schema {
            if let Some(value) = config.get(name) {
                let value = match field.kind() {
                    Some(kind) => sanitize_value(kind, value),
                    None => value.clone(),
                };
                sanitized.insert(name.clone(), value);
            }
        }
        sanitized
    }

    /// Form description ordered by `(sort_order, name)`.
    pub fn generate_configuration_form(
        &self,
        schema: &ConfigSchema,
        current_values: &Map<String, Value>,
    ) -> Vec<FormField> {
        let mut fields: Vec<FormField> = schema
            .iter()
            .map(|(name, field)| build_form_field(name, field, current_values))
            .collect();
        fields.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        fields
    }

    /// JSON Schema of the base widget definition.
    pub fn generate_json_schema(&self) -> Value {
        let field_types: Vec<String> = FieldType::all().iter().map(|t| t.to_string()).collect();
        let string_list = json!({"type": "array", "items": {"type": "string"}});

        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "title": "WidgetDefinition",
            "type": "object",
            "required": ["id", "title"],
            "properties": {
                "id": {
                    "type": "string",
                    "pattern": "^[A-Za-z0-9][A-Za-z0-9_.\\-]*$",
                    "maxLength": shared::validation::MAX_WIDGET_ID_LENGTH
                },
                "title": {"type": "string"},
                "description": {"type": "string"},
                "category": {"type": "string"},
                "version": {"type": "string"},
                "size": {
                    "type": "object",
                    "required": ["width", "height"],
                    "properties": {
                        "width": {"type": "integer", "minimum": 1},
                        "height": {"type": "integer", "minimum": 1}
                    }
                },
                "dependencies": {
                    "type": "array",
                    "items": {
                        "oneOf": [
                            {"type": "string"},
                            {
                                "type": "object",
                                "required": ["id"],
                                "properties": {
                                    "id": {"type": "string"},
                                    "version_constraint": {"type": "string"},
                                    "category": {"type": "string"},
                                    "permissions": string_list.clone()
                                }
                            }
                        ]
                    }
                },
                "conflicts": string_list.clone(),
                "permissions": {
                    "oneOf": [
                        string_list.clone(),
                        {"type": "object", "additionalProperties": string_list.clone()}
                    ]
                },
                "role_permissions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "roles": string_list.clone(),
                            "actions": string_list.clone(),
                            "denied_roles": string_list.clone()
                        }
                    }
                },
                "custom_permissions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["type"],
                        "properties": {
                            "type": {"enum": ["time_based", "callback"]}
                        }
                    }
                },
                "tenant_permissions": {
                    "type": "object",
                    "properties": {
                        "require_tenant": {"type": "boolean"},
                        "permissions": string_list.clone(),
                        "roles": string_list.clone()
                    }
                },
                "feature_flags": {
                    "type": "array",
                    "items": {
                        "oneOf": [
                            {"type": "string"},
                            {
                                "type": "object",
                                "required": ["name"],
                                "properties": {
                                    "name": {"type": "string"},
                                    "context": {"enum": ["user", "global"]},
                                    "required": {"type": "boolean"}
                                }
                            }
                        ]
                    }
                },
                "config_schema": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "required": ["type"],
                        "properties": {
                            "type": {"enum": field_types},
                            "label": {"type": "string"},
                            "required": {"type": "boolean"},
                            "options": {"type": "array"},
                            "min": {"type": "number"},
                            "max": {"type": "number"}
                        }
                    }
                }
            }
        })
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Accepted boolean spellings.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(true),
            "false" | "0" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Integral floats become JSON integers so `"5"` sanitizes to `5`, not `5.0`.
fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

fn format_number(f: f64) -> String {
    if f.fract() == 0.0 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn option_list(field: &FieldDescriptor) -> String {
    field
        .options
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(|o| value_key(o.value()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_value(kind: FieldType, name: &str, field: &FieldDescriptor, value: &Value) -> Vec<String> {
    let label = field.label_or(name);
    let mut messages = Vec::new();

    match kind {
        FieldType::Select => {
            if !field.allows(value) {
                messages.push(format!("{} must be one of: {}", label, option_list(field)));
            }
        }
        FieldType::Multiselect => match value.as_array() {
            Some(items) => {
                for item in items.iter().filter(|item| !field.allows(item)) {
                    messages.push(format!(
                        "{} contains an invalid option '{}'",
                        label,
                        value_key(item)
                    ));
                }
            }
            None => messages.push(format!("{} must be a list of options", label)),
        },
        FieldType::Number => match coerce_number(value) {
            Some(n) => {
                if let Some(min) = field.min.filter(|min| n < *min) {
                    messages.push(format!("{} must be at least {}", label, format_number(min)));
                }
                if let Some(max) = field.max.filter(|max| n > *max) {
                    messages.push(format!("{} may not be greater than {}", label, format_number(max)));
                }
            }
            None => messages.push(format!("{} must be a number", label)),
        },
        FieldType::Boolean => {
            if coerce_bool(value).is_none() {
                messages.push(format!("{} must be true or false", label));
            }
        }
        FieldType::Text | FieldType::Textarea | FieldType::Email | FieldType::Url => {
            let Some(text) = value.as_str() else {
                messages.push(format!("{} must be text", label));
                return messages;
            };
            let length = text.chars().count();
            if let Some(min) = field.min_length.filter(|min| length < *min) {
                messages.push(format!("{} must be at least {} characters", label, min));
            }
            if let Some(max) = field.max_length.filter(|max| length > *max) {
                messages.push(format!("{} may not be greater than {} characters", label, max));
            }
            let format_check = match kind {
                FieldType::Email => validate_email_value(text),
                FieldType::Url => validate_url_value(text),
                _ => Ok(()),
            };
            if let Err(e) = format_check {
                messages.push(format!("{}: {}", label, error_message(&e)));
            }
        }
        FieldType::Json => {
            let valid = match value {
                Value::String(s) => serde_json::from_str::<Value>(s).is_ok(),
                Value::Object(_) | Value::Array(_) => true,
                _ => false,
            };
            if !valid {
                messages.push(format!("{} must be valid JSON", label));
            }
        }
        FieldType::Color => {
            let result = value.as_str().map(validate_hex_color);
            if !matches!(result, Some(Ok(()))) {
                messages.push(format!("{} must be a hex color such as #1f2937", label));
            }
        }
        FieldType::Date => {
            let result = value.as_str().map(validate_iso_date);
            if !matches!(result, Some(Ok(()))) {
                messages.push(format!("{} must be a date in YYYY-MM-DD format", label));
            }
        }
    }

    messages
}

fn sanitize_value(kind: FieldType, value: &Value) -> Value {
    match kind {
        FieldType::Boolean => coerce_bool(value)
            .map(Value::Bool)
            .unwrap_or_else(|| value.clone()),
        FieldType::Number => match value {
            Value::String(_) => coerce_number(value)
                .map(number_value)
                .unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        },
        // A non-list multiselect value is replaced by an empty selection.
        FieldType::Multiselect => match value {
            Value::Array(_) => value.clone(),
            _ => Value::Array(Vec::new()),
        },
        FieldType::Json => match value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(decoded @ (Value::Object(_) | Value::Array(_))) => decoded,
                _ => value.clone(),
            },
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

fn build_form_field(name: &str, field: &FieldDescriptor, current: &Map<String, Value>) -> FormField {
    let kind = field.kind();
    let mut validation = vec![if field.required { "required" } else { "nullable" }.to_string()];
    let mut attributes = BTreeMap::new();

    if let Some(placeholder) = &field.placeholder {
        attributes.insert("placeholder".to_string(), json!(placeholder));
    }

    match kind {
        Some(FieldType::Number) => {
            validation.push("numeric".to_string());
            if let Some(min) = field.min {
                validation.push(format!("min:{}", format_number(min)));
                attributes.insert("min".to_string(), number_value(min));
            }
            if let Some(max) = field.max {
                validation.push(format!("max:{}", format_number(max)));
                attributes.insert("max".to_string(), number_value(max));
            }
            if let Some(step) = field.step {
                attributes.insert("step".to_string(), number_value(step));
            }
        }
        Some(FieldType::Boolean) => validation.push("boolean".to_string()),
        Some(FieldType::Select) => validation.push(format!("in:{}", option_keys(field))),
        Some(FieldType::Multiselect) => {
            validation.push("array".to_string());
            attributes.insert("multiple".to_string(), json!(true));
        }
        Some(FieldType::Json) => validation.push("json".to_string()),
        Some(kind) if kind.is_textual() => {
            if kind == FieldType::Email {
                validation.push("email".to_string());
            }
            if kind == FieldType::Url {
                validation.push("url".to_string());
            }
            if let Some(min) = field.min_length {
                validation.push(format!("min:{}", min));
                attributes.insert("minlength".to_string(), json!(min));
            }
            if let Some(max) = field.max_length {
                validation.push(format!("max:{}", max));
                attributes.insert("maxlength".to_string(), json!(max));
            }
        }
        _ => {}
    }
    validation.extend(field.validation.iter().cloned());

    let current_value = current
        .get(name)
        .cloned()
        .or_else(|| field.default.clone())
        .unwrap_or(Value::Null);

    FormField {
        name: name.to_string(),
        field_type: kind.map_or_else(
            || field.field_type.clone().unwrap_or_default(),
            |k| k.to_string(),
        ),
        label: field.label_or(name),
        description: field.description.clone(),
        required: field.required,
        current_value,
        options: field.options.clone(),
        validation,
        attributes,
        sort_order: field.sort_order,
    }
}

fn option_keys(field: &FieldDescriptor) -> String {
    field
        .options
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(|o| value_key(o.value()))
        .collect::<Vec<_>>()
        .join(",")
}
