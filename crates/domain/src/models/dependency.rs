//! Dependency declarations, version constraints and graph dumps.

use semver::Version;
use serde::{Deserialize, Serialize};
use shared::validation::{error_message, parse_version};
use std::fmt;
use std::str::FromStr;

/// A normalized dependency on another widget.
///
/// Declarations may be written either as a bare widget id (`"data_formatter"`)
/// or as a structured object; both deserialize into this one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DependencyDeclaration")]
pub struct WidgetDependency {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_constraint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

/// Accepted input shapes for a dependency entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DependencyDeclaration {
    Id(String),
    Detailed {
        id: String,
        #[serde(default, alias = "version")]
        version_constraint: Option<String>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        permissions: Vec<String>,
    },
}

impl From<DependencyDeclaration> for WidgetDependency {
    fn from(declaration: DependencyDeclaration) -> Self {
        match declaration {
            DependencyDeclaration::Id(id) => WidgetDependency::new(id),
            DependencyDeclaration::Detailed {
                id,
                version_constraint,
                category,
                permissions,
            } => WidgetDependency {
                id,
                version_constraint: version_constraint.filter(|c| !c.trim().is_empty()),
                category,
                permissions,
            },
        }
    }
}

impl From<&str> for WidgetDependency {
    fn from(id: &str) -> Self {
        WidgetDependency::new(id)
    }
}

impl WidgetDependency {
    /// Create an "any version" dependency.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version_constraint: None,
            category: None,
            permissions: Vec::new(),
        }
    }

    /// Attach a version constraint such as `>=1.2.0` or `^2.0.0`.
    pub fn with_version(mut self, constraint: impl Into<String>) -> Self {
        self.version_constraint = Some(constraint.into());
        self
    }

    /// Require the dependency to belong to a category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Require the user to hold permissions for the dependency to be usable.
    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Parse the declared constraint.
    pub fn constraint(&self) -> Result<VersionConstraint, String> {
        match &self.version_constraint {
            Some(raw) => raw.parse(),
            None => Ok(VersionConstraint::Any),
        }
    }
}

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// No constraint, or `*`.
    Any,
    /// `>=X.Y.Z`
    AtLeast(Version),
    /// `^X.Y.Z`: same major version, greater or equal.
    Compatible(Version),
    /// `X.Y.Z` or `=X.Y.Z`
    Exact(Version),
}

impl VersionConstraint {
    /// Check whether a registered version satisfies this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::AtLeast(min) => version >= min,
            VersionConstraint::Compatible(base) => {
                version.major == base.major && version >= base
            }
            VersionConstraint::Exact(expected) => version == expected,
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(VersionConstraint::Any);
        }

        let parse = |raw: &str| {
            parse_version(raw).map_err(|e| {
                format!("Invalid version constraint '{}': {}", s, error_message(&e))
            })
        };

        if let Some(rest) = trimmed.strip_prefix(">=") {
            Ok(VersionConstraint::AtLeast(parse(rest)?))
        } else if let Some(rest) = trimmed.strip_prefix('^') {
            Ok(VersionConstraint::Compatible(parse(rest)?))
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            Ok(VersionConstraint::Exact(parse(rest)?))
        } else {
            Ok(VersionConstraint::Exact(parse(trimmed)?))
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::AtLeast(v) => write!(f, ">={}", v),
            VersionConstraint::Compatible(v) => write!(f, "^{}", v),
            VersionConstraint::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Node of the dependency graph dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    pub category: String,
    pub version: String,
}

/// Edge of the dependency graph dump: `from` depends on `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_constraint: Option<String>,
}

/// Full visualization dump of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Two widgets that cannot coexist in one selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WidgetConflict {
    pub widget1: String,
    pub widget2: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_string_dependency_normalized() {
        let dep: WidgetDependency = serde_json::from_value(json!("data_formatter")).unwrap();
        assert_eq!(dep, WidgetDependency::new("data_formatter"));
        assert_eq!(dep.constraint().unwrap(), VersionConstraint::Any);
    }

    #[test]
    fn test_structured_dependency_deserialize() {
        let dep: WidgetDependency = serde_json::from_value(json!({
            "id": "analytics_core",
            "version_constraint": ">=1.2.0",
            "category": "analytics",
            "permissions": ["analytics.view"]
        }))
        .unwrap();
        assert_eq!(dep.id, "analytics_core");
        assert_eq!(dep.version_constraint.as_deref(), Some(">=1.2.0"));
        assert_eq!(dep.category.as_deref(), Some("analytics"));
        assert_eq!(dep.permissions, vec!["analytics.view".to_string()]);
    }

    #[test]
    fn test_version_alias_and_blank_constraint() {
        let dep: WidgetDependency =
            serde_json::from_value(json!({"id": "a", "version": "^2.0.0"})).unwrap();
        assert_eq!(dep.version_constraint.as_deref(), Some("^2.0.0"));

        let blank: WidgetDependency =
            serde_json::from_value(json!({"id": "a", "version_constraint": "  "})).unwrap();
        assert!(blank.version_constraint.is_none());
    }

    #[test]
    fn test_mixed_dependency_list() {
        let deps: Vec<WidgetDependency> = serde_json::from_value(json!([
            "data_formatter",
            {"id": "analytics_core", "version_constraint": "^1.0.0"}
        ]))
        .unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].id, "data_formatter");
        assert_eq!(deps[1].version_constraint.as_deref(), Some("^1.0.0"));
    }

    #[test]
    fn test_dependency_serializes_canonical_shape() {
        let json = serde_json::to_value(WidgetDependency::new("a")).unwrap();
        assert_eq!(json, json!({"id": "a"}));
    }

    #[test]
    fn test_constraint_parse() {
        assert_eq!(
            ">=1.2.0".parse::<VersionConstraint>().unwrap(),
            VersionConstraint::AtLeast(Version::new(1, 2, 0))
        );
        assert_eq!(
            "^2.1".parse::<VersionConstraint>().unwrap(),
            VersionConstraint::Compatible(Version::new(2, 1, 0))
        );
        assert_eq!(
            "1.0.0".parse::<VersionConstraint>().unwrap(),
            VersionConstraint::Exact(Version::new(1, 0, 0))
        );
        assert_eq!(
            "=1.0.0".parse::<VersionConstraint>().unwrap(),
            VersionConstraint::Exact(Version::new(1, 0, 0))
        );
        assert_eq!("*".parse::<VersionConstraint>().unwrap(), VersionConstraint::Any);
    }

    #[test]
    fn test_constraint_parse_invalid() {
        assert!("~1.0.0".parse::<VersionConstraint>().is_err());
        assert!("<2.0.0".parse::<VersionConstraint>().is_err());
        assert!(">=banana".parse::<VersionConstraint>().is_err());
        let err = "^x".parse::<VersionConstraint>().unwrap_err();
        assert!(err.contains("Invalid version constraint '^x'"));
    }

    #[test]
    fn test_constraint_matches() {
        let at_least: VersionConstraint = ">=1.2.0".parse().unwrap();
        assert!(at_least.matches(&Version::new(1, 2, 0)));
        assert!(at_least.matches(&Version::new(3, 0, 0)));
        assert!(!at_least.matches(&Version::new(1, 1, 9)));

        let compatible: VersionConstraint = "^1.2.0".parse().unwrap();
        assert!(compatible.matches(&Version::new(1, 2, 0)));
        assert!(compatible.matches(&Version::new(1, 9, 3)));
        assert!(!compatible.matches(&Version::new(2, 0, 0)));
        assert!(!compatible.matches(&Version::new(1, 1, 0)));

        let exact: VersionConstraint = "1.0.0".parse().unwrap();
        assert!(exact.matches(&Version::new(1, 0, 0)));
        assert!(!exact.matches(&Version::new(1, 0, 1)));
    }

    #[test]
    fn test_constraint_display() {
        assert_eq!(
            VersionConstraint::AtLeast(Version::new(1, 0, 0)).to_string(),
            ">=1.0.0"
        );
        assert_eq!(
            VersionConstraint::Compatible(Version::new(2, 0, 0)).to_string(),
            "^2.0.0"
        );
        assert_eq!(VersionConstraint::Any.to_string(), "*");
    }
}
