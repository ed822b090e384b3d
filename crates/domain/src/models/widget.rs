//! Widget definition model.

use serde::{Deserialize, Serialize};

use super::config_schema::{ConfigSchema, FieldDescriptor};
use super::dependency::WidgetDependency;
use super::feature_flag::FlagRequirement;
use super::permission::{
    CustomPermissionRule, RolePermissionRule, TenantPermissions, WidgetPermissions,
};

/// Category assigned when a definition does not name one.
pub const DEFAULT_CATEGORY: &str = "general";

/// Version assigned when a definition does not name one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Grid footprint of a widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSize {
    pub width: u32,
    pub height: u32,
}

impl WidgetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for WidgetSize {
    fn default() -> Self {
        Self {
            width: 4,
            height: 3,
        }
    }
}

/// Bounds applied to widget sizes at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SizeConstraints {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
}

impl Default for SizeConstraints {
    fn default() -> Self {
        Self {
            min_width: 1,
            max_width: 12,
            min_height: 1,
            max_height: 12,
        }
    }
}

/// A pluggable dashboard widget as declared by its author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WidgetDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Filled from configuration at registration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<WidgetSize>,
    #[serde(default)]
    pub dependencies: Vec<WidgetDependency>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub permissions: WidgetPermissions,
    #[serde(default)]
    pub role_permissions: Vec<RolePermissionRule>,
    #[serde(default)]
    pub custom_permissions: Vec<CustomPermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_permissions: Option<TenantPermissions>,
    #[serde(default)]
    pub feature_flags: Vec<FlagRequirement>,
    #[serde(default)]
    pub config_schema: ConfigSchema,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

impl WidgetDefinition {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            category: default_category(),
            version: default_version(),
            size: None,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            permissions: WidgetPermissions::default(),
            role_permissions: Vec::new(),
            custom_permissions: Vec::new(),
            tenant_permissions: None,
            feature_flags: Vec::new(),
            config_schema: ConfigSchema::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some(WidgetSize::new(width, height));
        self
    }

    /// Adds a dependency; accepts a bare id or a built `WidgetDependency`.
    pub fn depends_on(mut self, dependency: impl Into<WidgetDependency>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn conflicts_with(mut self, widget_id: impl Into<String>) -> Self {
        self.conflicts.push(widget_id.into());
        self
    }

    pub fn with_permissions(mut self, permissions: WidgetPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_role_rule(mut self, rule: RolePermissionRule) -> Self {
        self.role_permissions.push(rule);
        self
    }

    pub fn with_custom_rule(mut self, rule: CustomPermissionRule) -> Self {
        self.custom_permissions.push(rule);
        self
    }

    pub fn with_tenant_permissions(mut self, tenant: TenantPermissions) -> Self {
        self.tenant_permissions = Some(tenant);
        self
    }

    pub fn with_flag(mut self, requirement: FlagRequirement) -> Self {
        self.feature_flags.push(requirement);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.config_schema.insert(name.into(), field);
        self
    }

    /// Ids of direct dependencies in declaration order.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.id.as_str())
    }

    pub fn depends_directly_on(&self, widget_id: &str) -> bool {
        self.dependencies.iter().any(|d| d.id == widget_id)
    }

    pub fn declares_conflict_with(&self, widget_id: &str) -> bool {
        self.conflicts.iter().any(|c| c == widget_id)
    }

    /// True when the widget declares no access control at all.
    pub fn is_open(&self) -> bool {
        self.permissions.is_empty()
            && self.role_permissions.is_empty()
            && self.custom_permissions.is_empty()
            && self
                .tenant_permissions
                .as_ref()
                .map_or(true, |t| !t.require_tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dependency::WidgetDependency;
    use serde_json::json;

    #[test]
    fn test_minimal_definition_defaults() {
        let def: WidgetDefinition =
            serde_json::from_value(json!({"id": "clock", "title": "Clock"})).unwrap();
        assert_eq!(def.category, DEFAULT_CATEGORY);
        assert_eq!(def.version, DEFAULT_VERSION);
        assert!(def.size.is_none());
        assert!(def.dependencies.is_empty());
        assert!(def.is_open());
    }

    #[test]
    fn test_full_definition_deserialize() {
        let def: WidgetDefinition = serde_json::from_value(json!({
            "id": "sales_chart",
            "title": "Sales Chart",
            "category": "analytics",
            "version": "2.1.0",
            "size": {"width": 6, "height": 4},
            "dependencies": ["data_formatter", {"id": "analytics_core", "version_constraint": ">=1.2.0"}],
            "conflicts": ["legacy_chart"],
            "permissions": {"view": ["sales.view"]},
            "role_permissions": [{"roles": ["manager"], "actions": ["view"]}],
            "tenant_permissions": {"require_tenant": true},
            "feature_flags": ["new_charts"],
            "config_schema": {"range": {"type": "select", "options": ["7d", "30d"]}}
        }))
        .unwrap();

        assert_eq!(def.size, Some(WidgetSize::new(6, 4)));
        assert_eq!(def.dependency_ids().collect::<Vec<_>>(), vec!["data_formatter", "analytics_core"]);
        assert!(def.depends_directly_on("analytics_core"));
        assert!(def.declares_conflict_with("legacy_chart"));
        assert_eq!(def.feature_flags[0].name, "new_charts");
        assert!(!def.is_open());
    }

    #[test]
    fn test_builder() {
        let def = WidgetDefinition::new("a", "A")
            .with_category("ops")
            .with_version("1.2.0")
            .with_size(2, 2)
            .depends_on("b")
            .depends_on(WidgetDependency::new("c").with_version("^1.0.0"))
            .conflicts_with("d");
        assert_eq!(def.dependencies.len(), 2);
        assert_eq!(def.dependencies[1].version_constraint.as_deref(), Some("^1.0.0"));
        assert_eq!(def.conflicts, vec!["d".to_string()]);
    }

    #[test]
    fn test_tenant_without_requirement_is_open() {
        let def = WidgetDefinition::new("a", "A").with_tenant_permissions(TenantPermissions {
            require_tenant: false,
            permissions: vec!["x".into()],
            roles: vec![],
        });
        assert!(def.is_open());
    }
}
