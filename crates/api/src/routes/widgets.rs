//! Widget engine endpoint handlers.
//!
//! The caller is an authenticated upstream; it passes the `WidgetUser` it
//! resolved in the request body.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::permission::DEFAULT_ACTION;
use domain::models::{
    DependencyGraph, FeatureFlag, PermissionAudit, SelectionValidation, UserWidgetSelection,
    WidgetConflict, WidgetDefinition, WidgetSize, WidgetUser,
};
use domain::services::{FieldErrors, FormField};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

fn default_action() -> String {
    DEFAULT_ACTION.to_string()
}

fn require_user(user: &WidgetUser) -> Result<(), ApiError> {
    if user.id.trim().is_empty() {
        return Err(ApiError::Validation("user.id is required".to_string()));
    }
    Ok(())
}

/// Listing entry for a registered widget.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct WidgetSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<WidgetSize>,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
}

impl From<&WidgetDefinition> for WidgetSummary {
    fn from(widget: &WidgetDefinition) -> Self {
        Self {
            id: widget.id.clone(),
            title: widget.title.clone(),
            description: widget.description.clone(),
            category: widget.category.clone(),
            version: widget.version.clone(),
            size: widget.size,
            dependencies: widget.dependency_ids().map(str::to_string).collect(),
            conflicts: widget.conflicts.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListWidgetsQuery {
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListWidgetsResponse {
    pub widgets: Vec<WidgetSummary>,
    pub total: usize,
}

/// List registered widgets, optionally filtered by category.
///
/// GET /api/v1/widgets?category=<name>
pub async fn list_widgets(
    State(state): State<AppState>,
    Query(query): Query<ListWidgetsQuery>,
) -> Json<ListWidgetsResponse> {
    let widgets: Vec<WidgetSummary> = state
        .widgets
        .registry()
        .all(query.category.as_deref())
        .iter()
        .map(|w| WidgetSummary::from(w.as_ref()))
        .collect();
    Json(ListWidgetsResponse {
        total: widgets.len(),
        widgets,
    })
}

/// Register a widget definition.
///
/// POST /api/v1/widgets
pub async fn register_widget(
    State(state): State<AppState>,
    Json(definition): Json<WidgetDefinition>,
) -> Result<(StatusCode, Json<WidgetSummary>), ApiError> {
    let widget_id = definition.id.clone();
    state.widgets.register(definition)?;
    let stored = state.widgets.get_widget(&widget_id)?;
    Ok((StatusCode::CREATED, Json(WidgetSummary::from(stored.as_ref()))))
}

/// Get a widget definition.
///
/// GET /api/v1/widgets/:widget_id
pub async fn get_widget(
    State(state): State<AppState>,
    Path(widget_id): Path<String>,
) -> Result<Json<WidgetDefinition>, ApiError> {
    let widget = state.widgets.get_widget(&widget_id)?;
    Ok(Json(widget.as_ref().clone()))
}

#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    /// Categories used by registered widgets.
    pub categories: Vec<String>,
    /// Configured allow-list; empty when any category is accepted.
    pub allowed: Vec<String>,
}

/// GET /api/v1/widgets/categories
pub async fn list_categories(State(state): State<AppState>) -> Json<CategoriesResponse> {
    Json(CategoriesResponse {
        categories: state.widgets.registry().categories().into_iter().collect(),
        allowed: state.widgets.config().categories.clone(),
    })
}

/// Full dependency graph for visualization.
///
/// GET /api/v1/widgets/graph
pub async fn dependency_graph(State(state): State<AppState>) -> Json<DependencyGraph> {
    Json(state.widgets.resolver().get_dependency_graph())
}

/// JSON Schema describing a widget `config_schema`.
///
/// GET /api/v1/widgets/schema
pub async fn config_json_schema(State(state): State<AppState>) -> Json<Value> {
    Json(state.widgets.schema_validator().generate_json_schema())
}

/// GET /api/v1/widgets/flags
pub async fn list_flags(State(state): State<AppState>) -> Json<Vec<FeatureFlag>> {
    Json(state.widgets.flags().flags())
}

#[derive(Debug, Deserialize)]
pub struct DependenciesQuery {
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Serialize)]
pub struct DependenciesResponse {
    pub widget_id: String,
    pub recursive: bool,
    pub dependencies: Vec<String>,
}

/// Direct or transitive dependencies of a widget.
///
/// GET /api/v1/widgets/:widget_id/dependencies?recursive=true
pub async fn get_dependencies(
    State(state): State<AppState>,
    Path(widget_id): Path<String>,
    Query(query): Query<DependenciesQuery>,
) -> Result<Json<DependenciesResponse>, ApiError> {
    let dependencies = state
        .widgets
        .resolver()
        .get_widget_dependencies(&widget_id, query.recursive)?;
    Ok(Json(DependenciesResponse {
        widget_id,
        recursive: query.recursive,
        dependencies,
    }))
}

#[derive(Debug, Serialize)]
pub struct DependentsResponse {
    pub widget_id: String,
    pub dependents: Vec<String>,
}

/// Widgets that depend on this one, directly or transitively.
///
/// GET /api/v1/widgets/:widget_id/dependents
pub async fn get_dependents(
    State(state): State<AppState>,
    Path(widget_id): Path<String>,
) -> Result<Json<DependentsResponse>, ApiError> {
    let dependents = state.widgets.resolver().get_reverse_dependencies(&widget_id)?;
    Ok(Json(DependentsResponse {
        widget_id,
        dependents,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct WidgetIdsRequest {
    #[validate(length(min = 1, message = "At least one widget id is required"))]
    pub widget_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LoadingOrderResponse {
    pub loading_order: Vec<String>,
}

/// Topological loading order of the given widgets and their dependencies.
///
/// POST /api/v1/widgets/loading-order
pub async fn loading_order(
    State(state): State<AppState>,
    Json(request): Json<WidgetIdsRequest>,
) -> Result<Json<LoadingOrderResponse>, ApiError> {
    request.validate()?;
    let loading_order = state
        .widgets
        .resolver()
        .resolve_loading_order(&request.widget_ids)?;
    Ok(Json(LoadingOrderResponse { loading_order }))
}

#[derive(Debug, Serialize)]
pub struct CompatibilityResponse {
    pub compatible: bool,
    pub conflicts: Vec<WidgetConflict>,
}

/// POST /api/v1/widgets/compatibility
pub async fn check_compatibility(
    State(state): State<AppState>,
    Json(request): Json<WidgetIdsRequest>,
) -> Result<Json<CompatibilityResponse>, ApiError> {
    request.validate()?;
    let conflicts = state
        .widgets
        .resolver()
        .check_widget_compatibility(&request.widget_ids)?;
    Ok(Json(CompatibilityResponse {
        compatible: conflicts.is_empty(),
        conflicts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ValidateSelectionRequest {
    pub selection: UserWidgetSelection,
    /// Permission and flag checks are skipped without a user.
    #[serde(default)]
    pub user: Option<WidgetUser>,
}

#[derive(Debug, Serialize)]
pub struct ValidateSelectionResponse {
    #[serde(flatten)]
    pub validation: SelectionValidation,
    /// Config errors per registered widget of the selection.
    pub config_errors: BTreeMap<String, FieldErrors>,
    /// The selection with configs coerced to their schemas.
    pub sanitized: UserWidgetSelection,
}

/// Validate a full selection: dependencies, conflicts, access and configs.
///
/// POST /api/v1/widgets/selection/validate
pub async fn validate_selection(
    State(state): State<AppState>,
    Json(request): Json<ValidateSelectionRequest>,
) -> Result<Json<ValidateSelectionResponse>, ApiError> {
    if let Some(user) = &request.user {
        require_user(user)?;
    }
    let widgets = &state.widgets;
    let selection = request.selection;

    let mut validation =
        widgets.validate_user_widget_selection(&selection.widgets, request.user.as_ref());

    // Unknown widgets are already reported by the selection check
    let registry = widgets.registry();
    let mut known = selection.clone();
    known.widgets.retain(|id| registry.contains(id));
    known.configs.retain(|id, _| registry.contains(id));
    let config_errors = widgets.validate_selection_configuration(&known)?;
    if !config_errors.is_empty() {
        validation.valid = false;
        validation.loading_order = None;
    }

    Ok(Json(ValidateSelectionResponse {
        validation,
        config_errors,
        sanitized: widgets.sanitize_selection(&selection),
    }))
}

#[derive(Debug, Deserialize)]
pub struct WidgetConfigRequest {
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct WidgetConfigResponse {
    pub widget_id: String,
    pub valid: bool,
    pub errors: FieldErrors,
    pub sanitized: Map<String, Value>,
}

/// Validate one widget's configuration against its schema.
///
/// POST /api/v1/widgets/:widget_id/config/validate
pub async fn validate_widget_config(
    State(state): State<AppState>,
    Path(widget_id): Path<String>,
    Json(request): Json<WidgetConfigRequest>,
) -> Result<Json<WidgetConfigResponse>, ApiError> {
    let widget = state.widgets.get_widget(&widget_id)?;
    let errors = state
        .widgets
        .validate_widget_config(&widget_id, &request.config)?;
    let sanitized = state
        .widgets
        .schema_validator()
        .sanitize(&widget.config_schema, &request.config);
    Ok(Json(WidgetConfigResponse {
        widget_id,
        valid: errors.is_empty(),
        errors,
        sanitized,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConfigFormResponse {
    pub widget_id: String,
    pub fields: Vec<FormField>,
}

/// Render the configuration form, prefilled with `config`.
///
/// POST /api/v1/widgets/:widget_id/config/form
pub async fn configuration_form(
    State(state): State<AppState>,
    Path(widget_id): Path<String>,
    Json(request): Json<WidgetConfigRequest>,
) -> Result<Json<ConfigFormResponse>, ApiError> {
    let fields = state
        .widgets
        .configuration_form(&widget_id, &request.config)?;
    Ok(Json(ConfigFormResponse { widget_id, fields }))
}

#[derive(Debug, Deserialize)]
pub struct PermissionAuditRequest {
    pub user: WidgetUser,
    #[serde(default = "default_action")]
    pub action: String,
}

/// Every permission check evaluated for one user and widget.
///
/// POST /api/v1/widgets/:widget_id/permissions/audit
pub async fn permission_audit(
    State(state): State<AppState>,
    Path(widget_id): Path<String>,
    Json(request): Json<PermissionAuditRequest>,
) -> Result<Json<PermissionAudit>, ApiError> {
    require_user(&request.user)?;
    let audit = state
        .widgets
        .permission_audit(&request.user, &widget_id, &request.action)?;
    Ok(Json(audit))
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkPermissionRequest {
    pub user: WidgetUser,
    #[validate(length(min = 1, message = "At least one widget id is required"))]
    pub widget_ids: Vec<String>,
    #[serde(default = "default_action")]
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct BulkPermissionResponse {
    pub action: String,
    pub results: BTreeMap<String, bool>,
}

/// POST /api/v1/widgets/permissions/bulk
pub async fn check_bulk_permissions(
    State(state): State<AppState>,
    Json(request): Json<BulkPermissionRequest>,
) -> Result<Json<BulkPermissionResponse>, ApiError> {
    request.validate()?;
    require_user(&request.user)?;
    let results =
        state
            .widgets
            .check_bulk_permissions(&request.user, &request.widget_ids, &request.action)?;
    Ok(Json(BulkPermissionResponse {
        action: request.action,
        results,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AccessibleWidgetsRequest {
    pub user: WidgetUser,
    #[serde(default = "default_action")]
    pub action: String,
    /// Keep only widgets whose dependencies are accessible too, in loading order.
    #[serde(default)]
    pub include_dependencies: bool,
}

#[derive(Debug, Serialize)]
pub struct AccessibleWidgetsResponse {
    pub action: String,
    pub widgets: Vec<WidgetSummary>,
}

/// Widgets the user may access.
///
/// POST /api/v1/widgets/accessible
pub async fn accessible_widgets(
    State(state): State<AppState>,
    Json(request): Json<AccessibleWidgetsRequest>,
) -> Result<Json<AccessibleWidgetsResponse>, ApiError> {
    require_user(&request.user)?;
    let widgets: Vec<WidgetSummary> = if request.include_dependencies {
        state
            .widgets
            .get_user_widgets_with_dependencies(&request.user, &request.action)?
            .iter()
            .map(|w| WidgetSummary::from(w.as_ref()))
            .collect()
    } else {
        state
            .widgets
            .get_accessible_widgets(&request.user, &request.action)
            .values()
            .map(|w| WidgetSummary::from(w.as_ref()))
            .collect()
    };
    Ok(Json(AccessibleWidgetsResponse {
        action: request.action,
        widgets,
    }))
}

/// Forget one user's cached permission results.
///
/// DELETE /api/v1/widgets/cache/users/:user_id
pub async fn clear_user_cache(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.widgets.clear_user_cache(Some(&user_id));
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheQuery {
    pub user_id: Option<String>,
    pub widget_id: Option<String>,
}

/// Forget cached results by user and/or widget; flushes everything when
/// neither is given.
///
/// DELETE /api/v1/widgets/cache?user_id=<id>&widget_id=<id>
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<ClearCacheQuery>,
) -> StatusCode {
    state
        .widgets
        .clear_user_widget_permission_cache(query.user_id.as_deref(), query.widget_id.as_deref());
    StatusCode::NO_CONTENT
}
