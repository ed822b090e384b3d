//! Domain models for the widget engine.

pub mod config_schema;
pub mod dependency;
pub mod feature_flag;
pub mod permission;
pub mod selection;
pub mod user;
pub mod widget;

pub use config_schema::{ConfigSchema, FieldDescriptor, FieldOption, FieldType};
pub use dependency::{
    DependencyGraph, GraphEdge, GraphNode, VersionConstraint, WidgetConflict, WidgetDependency,
};
pub use feature_flag::{FeatureFlag, FlagConditions, FlagContext, FlagRequirement, RolloutStrategy};
pub use permission::{
    AuditCheck, CallbackRule, CustomPermissionRule, DayOfWeek, PermissionAudit,
    RolePermissionRule, TenantPermissions, TimeRange, TimeWindowRule, WidgetPermissions,
};
pub use selection::{
    SelectionIssue, SelectionIssueKind, SelectionValidation, UserWidgetSelection, WidgetPosition,
};
pub use user::WidgetUser;
pub use widget::{SizeConstraints, WidgetDefinition, WidgetSize};
