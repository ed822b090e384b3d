//! Domain error types.

use std::collections::BTreeMap;
use thiserror::Error;

/// Why a widget definition was rejected. Registration is all-or-nothing, so
/// any of these leaves the registry untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Invalid widget id '{widget_id}': {message}")]
    InvalidId { widget_id: String, message: String },

    #[error("Widget '{widget_id}' has an invalid version: {message}")]
    InvalidVersion { widget_id: String, message: String },

    #[error("Widget '{widget_id}' has invalid dependencies: {}", .errors.join("; "))]
    InvalidDependencies {
        widget_id: String,
        errors: Vec<String>,
    },

    #[error("Widget '{widget_id}' introduces circular dependencies: {}", format_cycles(.cycles))]
    CircularDependency {
        widget_id: String,
        cycles: Vec<Vec<String>>,
    },

    #[error("Widget '{widget_id}' has an invalid size: {message}")]
    InvalidSize { widget_id: String, message: String },

    #[error("Widget '{widget_id}' uses unknown category '{category}'")]
    UnknownCategory { widget_id: String, category: String },

    #[error("Widget '{widget_id}' has an invalid config schema")]
    InvalidSchema {
        widget_id: String,
        errors: BTreeMap<String, Vec<String>>,
    },

    #[error("Widget '{widget_id}' has invalid permission rules: {}", .errors.join("; "))]
    InvalidRules {
        widget_id: String,
        errors: Vec<String>,
    },
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

impl RegistrationError {
    pub fn widget_id(&self) -> &str {
        match self {
            RegistrationError::InvalidId { widget_id, .. }
            | RegistrationError::InvalidVersion { widget_id, .. }
            | RegistrationError::InvalidDependencies { widget_id, .. }
            | RegistrationError::CircularDependency { widget_id, .. }
            | RegistrationError::InvalidSize { widget_id, .. }
            | RegistrationError::UnknownCategory { widget_id, .. }
            | RegistrationError::InvalidSchema { widget_id, .. }
            | RegistrationError::InvalidRules { widget_id, .. } => widget_id,
        }
    }

    /// Field-level details as `(field, message)` pairs.
    pub fn details(&self) -> Vec<(String, String)> {
        match self {
            RegistrationError::InvalidId { message, .. } => vec![("id".into(), message.clone())],
            RegistrationError::InvalidVersion { message, .. } => {
                vec![("version".into(), message.clone())]
            }
            RegistrationError::InvalidDependencies { errors, .. } => errors
                .iter()
                .map(|e| ("dependencies".to_string(), e.clone()))
                .collect(),
            RegistrationError::CircularDependency { cycles, .. } => cycles
                .iter()
                .map(|c| ("dependencies".to_string(), c.join(" -> ")))
                .collect(),
            RegistrationError::InvalidSize { message, .. } => {
                vec![("size".into(), message.clone())]
            }
            RegistrationError::UnknownCategory { category, .. } => {
                vec![("category".into(), format!("Unknown category '{}'", category))]
            }
            RegistrationError::InvalidSchema { errors, .. } => errors
                .iter()
                .flat_map(|(field, messages)| {
                    messages
                        .iter()
                        .map(move |m| (format!("config_schema.{}", field), m.clone()))
                })
                .collect(),
            RegistrationError::InvalidRules { errors, .. } => errors
                .iter()
                .map(|e| ("custom_permissions".to_string(), e.clone()))
                .collect(),
        }
    }
}

/// Errors raised by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WidgetError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Widget '{0}' is not registered")]
    UnknownWidget(String),

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    Resolution { cycle: Vec<String> },
}

pub type WidgetResult<T> = Result<T, WidgetError>;
