//! A user's widget selection and the result of validating it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Placement of a widget on the user's grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetPosition {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Widgets chosen by one user, with layout and per-widget configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UserWidgetSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub widgets: Vec<String>,
    #[serde(default)]
    pub positions: BTreeMap<String, WidgetPosition>,
    #[serde(default)]
    pub configs: BTreeMap<String, Map<String, Value>>,
}

/// What went wrong with a selected widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionIssueKind {
    UnknownWidget,
    DuplicateWidget,
    MissingDependency { dependency: String },
    VersionMismatch { dependency: String, constraint: String, found: String },
    Conflict { other: String },
    PermissionDenied { action: String },
    DependencyPermissionDenied { dependency: String, permissions: Vec<String> },
    FeatureDisabled { flag: String },
    OptionalFeatureDisabled { flag: String },
    CircularDependency { cycle: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SelectionIssue {
    pub widget_id: String,
    #[serde(flatten)]
    pub kind: SelectionIssueKind,
    pub message: String,
}

impl SelectionIssue {
    pub fn new(widget_id: impl Into<String>, kind: SelectionIssueKind) -> Self {
        let widget_id = widget_id.into();
        let message = describe(&widget_id, &kind);
        Self {
            widget_id,
            kind,
            message,
        }
    }
}

fn describe(widget_id: &str, kind: &SelectionIssueKind) -> String {
    match kind {
        SelectionIssueKind::UnknownWidget => format!("Widget '{}' is not registered", widget_id),
        SelectionIssueKind::DuplicateWidget => {
            format!("Widget '{}' is selected more than once", widget_id)
        }
        SelectionIssueKind::MissingDependency { dependency } => format!(
            "Widget '{}' requires '{}', which is not selected",
            widget_id, dependency
        ),
        SelectionIssueKind::VersionMismatch {
            dependency,
            constraint,
            found,
        } => format!(
            "Widget '{}' requires '{}' {} but version {} is registered",
            widget_id, dependency, constraint, found
        ),
        SelectionIssueKind::Conflict { other } => {
            format!("Widget '{}' conflicts with '{}'", widget_id, other)
        }
        SelectionIssueKind::PermissionDenied { action } => format!(
            "Permission denied for action '{}' on widget '{}'",
            action, widget_id
        ),
        SelectionIssueKind::DependencyPermissionDenied {
            dependency,
            permissions,
        } => format!(
            "Widget '{}' needs permissions [{}] to use dependency '{}'",
            widget_id,
            permissions.join(", "),
            dependency
        ),
        SelectionIssueKind::FeatureDisabled { flag } => format!(
            "Widget '{}' requires feature '{}', which is disabled",
            widget_id, flag
        ),
        SelectionIssueKind::OptionalFeatureDisabled { flag } => format!(
            "Optional feature '{}' of widget '{}' is disabled",
            flag, widget_id
        ),
        SelectionIssueKind::CircularDependency { cycle } => format!(
            "Widget '{}' is part of a circular dependency: {}",
            widget_id,
            cycle.join(" -> ")
        ),
    }
}

/// Outcome of validating a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SelectionValidation {
    pub valid: bool,
    pub errors: Vec<SelectionIssue>,
    pub warnings: Vec<SelectionIssue>,
    /// Present only when the selection is valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_order: Option<Vec<String>>,
}

impl SelectionValidation {
    /// Error issues for one widget.
    pub fn errors_for<'a>(&'a self, widget_id: &'a str) -> impl Iterator<Item = &'a SelectionIssue> {
        self.errors.iter().filter(move |e| e.widget_id == widget_id)
    }
}
