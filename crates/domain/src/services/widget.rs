//! Widget service facade.
//!
//! Composes the registry, dependency resolver, schema validator, permission
//! evaluator and feature flag evaluator behind one entry point, and caches
//! per-user access results through a [`WidgetCache`].

use chrono::Duration;
use chrono_tz::Tz;
use metrics::counter;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::{RegistrationError, WidgetError, WidgetResult};
use crate::models::permission::DEFAULT_ACTION;
use crate::models::{
    AuditCheck, PermissionAudit, SelectionIssue, SelectionIssueKind, SelectionValidation,
    SizeConstraints, UserWidgetSelection, WidgetDefinition, WidgetDependency, WidgetSize,
    WidgetUser,
};
use crate::services::cache::{
    CacheKey, CacheScope, CacheValue, InMemoryWidgetCache, WidgetCache, ACCESSIBLE_WIDGETS,
    USER_WIDGETS,
};
use crate::services::clock::{Clock, SystemClock};
use crate::services::config_schema::{ConfigSchemaValidator, FieldErrors, FormField};
use crate::services::dependency_graph::{self, DependencyIssueKind, DependencyResolver};
use crate::services::feature_flag::FeatureFlagEvaluator;
use crate::services::permission::PermissionEvaluator;
use crate::services::registry::{RegistryState, WidgetRegistry};
use shared::validation::{error_message, parse_version, validate_dimension, validate_widget_id};

/// Engine settings supplied by the host.
#[derive(Debug, Clone)]
pub struct WidgetServiceConfig {
    /// Allowed categories; empty allows any.
    pub categories: Vec<String>,
    pub default_size: WidgetSize,
    pub size_constraints: SizeConstraints,
    pub default_timezone: Tz,
    pub cache_ttl: Duration,
    /// Reject dependencies on widgets that are not registered yet.
    pub strict_dependencies: bool,
}

impl Default for WidgetServiceConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            default_size: WidgetSize::default(),
            size_constraints: SizeConstraints::default(),
            default_timezone: Tz::UTC,
            cache_ttl: Duration::seconds(300),
            strict_dependencies: false,
        }
    }
}

pub struct WidgetService {
    config: WidgetServiceConfig,
    registry: Arc<WidgetRegistry>,
    resolver: DependencyResolver,
    schema: ConfigSchemaValidator,
    permissions: PermissionEvaluator,
    flags: FeatureFlagEvaluator,
    cache: Arc<dyn WidgetCache>,
}

impl WidgetService {
    pub fn new(config: WidgetServiceConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(InMemoryWidgetCache::new(clock.clone()));
        Self::with_parts(config, clock, cache)
    }

    /// Builds the service around an injected clock and cache provider.
    pub fn with_parts(
        config: WidgetServiceConfig,
        clock: Arc<dyn Clock>,
        cache: Arc<dyn WidgetCache>,
    ) -> Self {
        let registry = Arc::new(WidgetRegistry::new());
        Self {
            resolver: DependencyResolver::new(registry.clone()),
            schema: ConfigSchemaValidator::new(),
            permissions: PermissionEvaluator::new(registry.clone(), clock, config.default_timezone),
            flags: FeatureFlagEvaluator::new(),
            registry,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &WidgetServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn schema_validator(&self) -> &ConfigSchemaValidator {
        &self.schema
    }

    pub fn permissions(&self) -> &PermissionEvaluator {
        &self.permissions
    }

    pub fn flags(&self) -> &FeatureFlagEvaluator {
        &self.flags
    }

    pub fn get_widget(&self, widget_id: &str) -> WidgetResult<Arc<WidgetDefinition>> {
        self.registry
            .get(widget_id)
            .ok_or_else(|| WidgetError::UnknownWidget(widget_id.to_string()))
    }

    /// Validates and registers a definition. Nothing is stored on failure.
    pub fn register(&self, definition: WidgetDefinition) -> WidgetResult<()> {
        let widget_id = definition.id.clone();
        match self.try_register(definition) {
            Ok(()) => {
                counter!("widgets_registered_total").increment(1);
                self.cache.flush();
                Ok(())
            }
            Err(e) => {
                counter!("widget_registrations_rejected_total").increment(1);
                tracing::warn!(widget_id = %widget_id, error = %e, "Widget registration rejected");
                Err(e.into())
            }
        }
    }

    fn try_register(&self, mut definition: WidgetDefinition) -> Result<(), RegistrationError> {
        let widget_id = definition.id.clone();

        validate_widget_id(&widget_id).map_err(|e| RegistrationError::InvalidId {
            widget_id: widget_id.clone(),
            message: error_message(&e),
        })?;

        parse_version(&definition.version).map_err(|e| RegistrationError::InvalidVersion {
            widget_id: widget_id.clone(),
            message: error_message(&e),
        })?;

        let size = *definition.size.get_or_insert(self.config.default_size);
        let limits = self.config.size_constraints;
        validate_dimension("width", size.width, limits.min_width, limits.max_width)
            .and_then(|_| {
                validate_dimension("height", size.height, limits.min_height, limits.max_height)
            })
            .map_err(|e| RegistrationError::InvalidSize {
                widget_id: widget_id.clone(),
                message: error_message(&e),
            })?;

        if !self.config.categories.is_empty()
            && !self.config.categories.contains(&definition.category)
        {
            return Err(RegistrationError::UnknownCategory {
                widget_id,
                category: definition.category,
            });
        }

        let schema_errors = self
            .schema
            .validate_configuration_schema(&definition.config_schema);
        if !schema_errors.is_empty() {
            return Err(RegistrationError::InvalidSchema {
                widget_id,
                errors: schema_errors,
            });
        }

        let rule_errors = self.permissions.validate_rules(&definition);
        if !rule_errors.is_empty() {
            return Err(RegistrationError::InvalidRules {
                widget_id,
                errors: rule_errors,
            });
        }

        let strict = self.config.strict_dependencies;
        self.registry
            .register_with(definition, |state, definition| {
                let errors: Vec<String> =
                    dependency_graph::dependency_issues(state, &definition.dependencies)
                        .into_iter()
                        .filter(|issue| strict || issue.kind != DependencyIssueKind::Unregistered)
                        .map(|issue| issue.message)
                        .collect();
                if !errors.is_empty() {
                    return Err(RegistrationError::InvalidDependencies {
                        widget_id: definition.id.clone(),
                        errors,
                    });
                }

                let cycles =
                    dependency_graph::detect_cycles(state, &definition.id, &definition.dependencies);
                if !cycles.is_empty() {
                    return Err(RegistrationError::CircularDependency {
                        widget_id: definition.id.clone(),
                        cycles,
                    });
                }
                Ok(())
            })
            .map(|_| ())
    }

    /// Dependency problems left in the registry, one message per issue.
    ///
    /// Meant to run once the whole catalog is registered, when forward
    /// references must have been satisfied.
    pub fn verify_catalog(&self) -> Vec<String> {
        let state = self.registry.snapshot();
        state
            .iter()
            .flat_map(|widget| {
                dependency_graph::dependency_issues(&state, &widget.dependencies)
                    .into_iter()
                    .map(move |issue| format!("{}: {}", widget.id, issue.message))
            })
            .collect()
    }

    /// Checks a selection for unknown widgets, missing dependencies, version
    /// mismatches, conflicts, and permission or flag failures.
    pub fn validate_user_widget_selection(
        &self,
        selected: &[String],
        user: Option<&WidgetUser>,
    ) -> SelectionValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut unique: Vec<String> = Vec::new();
        for id in selected {
            if seen.insert(id.as_str()) {
                unique.push(id.clone());
            } else if reported.insert(id.as_str()) {
                warnings.push(SelectionIssue::new(id.as_str(), SelectionIssueKind::DuplicateWidget));
            }
        }
        let chosen: HashSet<&str> = unique.iter().map(String::as_str).collect();

        let state = self.registry.snapshot();
        let mut known = Vec::new();

        for id in &unique {
            let Some(widget) = state.get(id) else {
                errors.push(SelectionIssue::new(id.as_str(), SelectionIssueKind::UnknownWidget));
                continue;
            };
            known.push(id.clone());

            for dependency in dependency_graph::transitive_dependencies(&state, id) {
                if !chosen.contains(dependency.as_str()) {
                    errors.push(SelectionIssue::new(
                        id.as_str(),
                        SelectionIssueKind::MissingDependency { dependency },
                    ));
                }
            }

            for issue in dependency_graph::dependency_issues(&state, &widget.dependencies) {
                if issue.kind != DependencyIssueKind::VersionMismatch {
                    continue;
                }
                let constraint = widget
                    .dependencies
                    .iter()
                    .find(|d| d.id == issue.id)
                    .and_then(|d| d.version_constraint.clone())
                    .unwrap_or_default();
                let found = state
                    .get(&issue.id)
                    .map(|d| d.version.clone())
                    .unwrap_or_default();
                errors.push(SelectionIssue::new(
                    id.as_str(),
                    SelectionIssueKind::VersionMismatch {
                        dependency: issue.id,
                        constraint,
                        found,
                    },
                ));
            }

            if let Some(user) = user {
                if !self.permissions.evaluate_definition(user, widget, DEFAULT_ACTION) {
                    errors.push(SelectionIssue::new(
                        id.as_str(),
                        SelectionIssueKind::PermissionDenied {
                            action: DEFAULT_ACTION.to_string(),
                        },
                    ));
                }
                for dependency in unusable_dependencies(widget, user) {
                    errors.push(SelectionIssue::new(
                        id.as_str(),
                        SelectionIssueKind::DependencyPermissionDenied {
                            dependency: dependency.id.clone(),
                            permissions: dependency.permissions.clone(),
                        },
                    ));
                }
            }

            let flags = self.flags.evaluate_widget_flags(widget, user);
            for flag in flags.blocking {
                errors.push(SelectionIssue::new(
                    id.as_str(),
                    SelectionIssueKind::FeatureDisabled { flag },
                ));
            }
            for flag in flags.optional {
                warnings.push(SelectionIssue::new(
                    id.as_str(),
                    SelectionIssueKind::OptionalFeatureDisabled { flag },
                ));
            }
        }

        for conflict in dependency_graph::conflicts(&state, &known) {
            errors.push(SelectionIssue::new(
                conflict.widget1,
                SelectionIssueKind::Conflict {
                    other: conflict.widget2,
                },
            ));
        }

        let mut loading_order = None;
        if errors.is_empty() {
            match dependency_graph::loading_order(&state, &unique) {
                Ok(order) => loading_order = Some(order),
                Err(WidgetError::Resolution { cycle }) => {
                    let widget_id = cycle.first().cloned().unwrap_or_default();
                    errors.push(SelectionIssue::new(
                        widget_id,
                        SelectionIssueKind::CircularDependency { cycle },
                    ));
                }
                Err(WidgetError::UnknownWidget(missing)) => {
                    errors.push(SelectionIssue::new(missing, SelectionIssueKind::UnknownWidget));
                }
                Err(WidgetError::Registration(_)) => {}
            }
        }

        SelectionValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
            loading_order,
        }
    }

    /// Config errors per widget of a full selection, including required
    /// fields of selected widgets that carry no configuration.
    pub fn validate_selection_configuration(
        &self,
        selection: &UserWidgetSelection,
    ) -> WidgetResult<BTreeMap<String, FieldErrors>> {
        let empty = Map::new();
        let mut ids: Vec<&String> = selection.widgets.iter().collect();
        ids.extend(selection.configs.keys());

        let mut result = BTreeMap::new();
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let widget = self.get_widget(id)?;
            let config = selection.configs.get(id).unwrap_or(&empty);
            let errors = self
                .schema
                .validate_user_widget_config(&widget.config_schema, config);
            if !errors.is_empty() {
                result.insert(id.clone(), errors);
            }
        }
        Ok(result)
    }

    /// Copy of `selection` with every config sanitized against its widget's
    /// schema. Configs of unregistered widgets are dropped.
    pub fn sanitize_selection(&self, selection: &UserWidgetSelection) -> UserWidgetSelection {
        let configs = selection
            .configs
            .iter()
            .filter_map(|(id, config)| {
                let widget = self.registry.get(id)?;
                Some((id.clone(), self.schema.sanitize(&widget.config_schema, config)))
            })
            .collect();
        UserWidgetSelection {
            configs,
            ..selection.clone()
        }
    }

    pub fn validate_widget_config(
        &self,
        widget_id: &str,
        config: &Map<String, Value>,
    ) -> WidgetResult<FieldErrors> {
        let widget = self.get_widget(widget_id)?;
        Ok(self
            .schema
            .validate_user_widget_config(&widget.config_schema, config))
    }

    pub fn configuration_form(
        &self,
        widget_id: &str,
        current_values: &Map<String, Value>,
    ) -> WidgetResult<Vec<FormField>> {
        let widget = self.get_widget(widget_id)?;
        Ok(self
            .schema
            .generate_configuration_form(&widget.config_schema, current_values))
    }

    /// Permission decision combined with the widget's required flags.
    pub fn can_access(&self, user: &WidgetUser, widget_id: &str, action: &str) -> WidgetResult<bool> {
        let key = CacheKey::access(&user.id, widget_id, action);
        if let Some(CacheValue::Access(allowed)) = self.cache.get(&key) {
            return Ok(allowed);
        }

        let widget = self.get_widget(widget_id)?;
        let allowed = self.evaluate_access(user, &widget, action);
        self.cache
            .put(key, CacheValue::Access(allowed), self.config.cache_ttl);
        Ok(allowed)
    }

    /// Permission audit trail extended with one check per widget flag.
    pub fn permission_audit(
        &self,
        user: &WidgetUser,
        widget_id: &str,
        action: &str,
    ) -> WidgetResult<PermissionAudit> {
        let widget = self.get_widget(widget_id)?;
        let mut audit = self.permissions.audit_definition(user, &widget, action);
        let flags = self.flags.evaluate_widget_flags(&widget, Some(user));
        for requirement in &widget.feature_flags {
            let passed = !flags.blocking.contains(&requirement.name)
                && !flags.optional.contains(&requirement.name);
            audit.checks.push(AuditCheck {
                check: format!("feature_flag:{}", requirement.name),
                passed,
            });
        }
        audit.result = audit.result && flags.is_available();
        Ok(audit)
    }

    pub fn check_bulk_permissions(
        &self,
        user: &WidgetUser,
        widget_ids: &[String],
        action: &str,
    ) -> WidgetResult<BTreeMap<String, bool>> {
        widget_ids
            .iter()
            .map(|id| {
                self.can_access(user, id, action)
                    .map(|allowed| (id.clone(), allowed))
            })
            .collect()
    }

    pub fn get_accessible_widgets(
        &self,
        user: &WidgetUser,
        action: &str,
    ) -> BTreeMap<String, Arc<WidgetDefinition>> {
        let key = CacheKey::list(ACCESSIBLE_WIDGETS, &user.id, action);
        if let Some(CacheValue::WidgetIds(ids)) = self.cache.get(&key) {
            return ids
                .iter()
                .filter_map(|id| self.registry.get(id).map(|w| (id.clone(), w)))
                .collect();
        }

        let accessible: BTreeMap<String, Arc<WidgetDefinition>> = self
            .registry
            .all(None)
            .into_iter()
            .filter(|w| self.evaluate_access(user, w, action))
            .map(|w| (w.id.clone(), w))
            .collect();
        self.cache.put(
            key,
            CacheValue::WidgetIds(accessible.keys().cloned().collect()),
            self.config.cache_ttl,
        );
        accessible
    }

    /// Accessible widgets whose whole dependency closure is accessible too,
    /// in loading order.
    pub fn get_user_widgets_with_dependencies(
        &self,
        user: &WidgetUser,
        action: &str,
    ) -> WidgetResult<Vec<Arc<WidgetDefinition>>> {
        let key = CacheKey::list(USER_WIDGETS, &user.id, action);
        if let Some(CacheValue::WidgetIds(ids)) = self.cache.get(&key) {
            return Ok(ids.iter().filter_map(|id| self.registry.get(id)).collect());
        }

        let accessible = self.get_accessible_widgets(user, action);
        let ordered = {
            let state = self.registry.snapshot();
            let usable = usable_widgets(&state, &accessible, user);
            dependency_graph::loading_order(&state, &usable)?
        };

        self.cache.put(
            key,
            CacheValue::WidgetIds(ordered.clone()),
            self.config.cache_ttl,
        );
        Ok(ordered
            .iter()
            .filter_map(|id| accessible.get(id).cloned())
            .collect())
    }

    /// Forgets one user's cached results, or everything when `user_id` is `None`.
    pub fn clear_user_cache(&self, user_id: Option<&str>) {
        match user_id {
            Some(user_id) => {
                let removed = self.cache.forget_scope(&CacheScope::user(user_id));
                tracing::debug!(user_id = %user_id, removed, "User widget cache cleared");
            }
            None => {
                self.cache.flush();
                tracing::info!("Widget cache flushed");
            }
        }
    }

    /// Forgets cached results for a user and/or widget. A global flush
    /// happens only when neither is given.
    pub fn clear_user_widget_permission_cache(&self, user_id: Option<&str>, widget_id: Option<&str>) {
        if user_id.is_none() && widget_id.is_none() {
            self.clear_user_cache(None);
            return;
        }
        self.cache.forget_scope(&CacheScope {
            user_id: user_id.map(str::to_string),
            widget_id: widget_id.map(str::to_string),
        });
    }

    fn evaluate_access(&self, user: &WidgetUser, widget: &WidgetDefinition, action: &str) -> bool {
        self.permissions.evaluate_definition(user, widget, action)
            && self
                .flags
                .evaluate_widget_flags(widget, Some(user))
                .is_available()
    }
}

/// Dependency edges of `widget` whose declared permissions `user` lacks.
fn unusable_dependencies<'a>(
    widget: &'a WidgetDefinition,
    user: &'a WidgetUser,
) -> impl Iterator<Item = &'a WidgetDependency> + 'a {
    widget
        .dependencies
        .iter()
        .filter(move |dep| !user.has_all_permissions(&dep.permissions))
}

/// Ids of accessible widgets whose dependency closure is registered and
/// accessible, with every edge in that closure usable by `user`.
fn usable_widgets(
    state: &RegistryState,
    accessible: &BTreeMap<String, Arc<WidgetDefinition>>,
    user: &WidgetUser,
) -> Vec<String> {
    state
        .ids()
        .filter(|id| accessible.contains_key(*id))
        .filter(|id| {
            let closure = dependency_graph::transitive_dependencies(state, id);
            closure.iter().all(|dep| accessible.contains_key(dep))
                && std::iter::once(*id)
                    .chain(closure.iter().map(String::as_str))
                    .filter_map(|member| state.get(member))
                    .all(|member| unusable_dependencies(member, user).next().is_none())
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DayOfWeek, FeatureFlag, FieldDescriptor, FieldType, FlagRequirement, RolePermissionRule,
        TimeRange, TimeWindowRule, WidgetDependency, WidgetPermissions,
    };
    use crate::models::permission::CustomPermissionRule;
    use crate::services::clock::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn service() -> WidgetService {
        service_with(WidgetServiceConfig::default())
    }

    fn service_with(config: WidgetServiceConfig) -> WidgetService {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap()));
        let cache = Arc::new(InMemoryWidgetCache::new(clock.clone()));
        WidgetService::with_parts(config, clock, cache)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn register_charts(service: &WidgetService) {
        service
            .register(WidgetDefinition::new("data_formatter", "Data Formatter"))
            .unwrap();
        service
            .register(WidgetDefinition::new("analytics_core", "Analytics Core").with_version("1.4.0"))
            .unwrap();
        service
            .register(WidgetDefinition::new("basic_chart", "Basic Chart").depends_on("data_formatter"))
            .unwrap();
        service
            .register(
                WidgetDefinition::new("advanced_dashboard", "Advanced Dashboard")
                    .depends_on(WidgetDependency::new("analytics_core").with_version(">=1.2.0"))
                    .depends_on("basic_chart"),
            )
            .unwrap();
    }

    #[test]
    fn test_register_applies_default_size() {
        let service = service();
        service.register(WidgetDefinition::new("clock", "Clock")).unwrap();
        assert_eq!(service.get_widget("clock").unwrap().size, Some(WidgetSize::new(4, 3)));
    }

    #[test]
    fn test_register_rejects_invalid_definitions() {
        let service = service_with(WidgetServiceConfig {
            categories: ids(&["general", "analytics"]),
            ..Default::default()
        });

        let cases = vec![
            WidgetDefinition::new("bad id", "Bad"),
            WidgetDefinition::new("v", "V").with_version("one"),
            WidgetDefinition::new("big", "Big").with_size(13, 2),
            WidgetDefinition::new("misc", "Misc").with_category("misc"),
            WidgetDefinition::new("schema", "Schema")
                .with_field("mode", FieldDescriptor::new(FieldType::Select)),
            WidgetDefinition::new("rules", "Rules").with_custom_rule(CustomPermissionRule::TimeBased(
                TimeWindowRule {
                    timezone: Some("Nowhere/City".into()),
                    time_ranges: vec![],
                    days_of_week: vec![],
                },
            )),
        ];
        for def in cases {
            let id = def.id.clone();
            match service.register(def) {
                Err(WidgetError::Registration(e)) => assert_eq!(e.widget_id(), id),
                other => panic!("expected rejection of {}, got {:?}", id, other),
            }
        }
        assert!(service.registry().is_empty());
    }

    #[test]
    fn test_size_error_message() {
        let service = service();
        let err = service
            .register(WidgetDefinition::new("big", "Big").with_size(13, 2))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Widget 'big' has an invalid size: width must be between 1 and 12 (got 13)"
        );
    }

    #[test]
    fn test_register_cycle_rejected_either_order() {
        for (first, second) in [("widget_a", "widget_b"), ("widget_b", "widget_a")] {
            let service = service();
            service
                .register(WidgetDefinition::new(first, first).depends_on(second))
                .unwrap();
            let err = service
                .register(WidgetDefinition::new(second, second).depends_on(first))
                .unwrap_err();
            match err {
                WidgetError::Registration(RegistrationError::CircularDependency { cycles, .. }) => {
                    let mut cycle = cycles[0].clone();
                    cycle.sort();
                    assert_eq!(cycle, ids(&["widget_a", "widget_b"]));
                }
                other => panic!("expected cycle error, got {:?}", other),
            }
            assert_eq!(service.registry().len(), 1);
        }
    }

    #[test]
    fn test_strict_mode_rejects_forward_references() {
        let service = service_with(WidgetServiceConfig {
            strict_dependencies: true,
            ..Default::default()
        });
        let err = service
            .register(WidgetDefinition::new("chart", "Chart").depends_on("formatter"))
            .unwrap_err();
        assert!(err.to_string().contains("Dependency 'formatter' is not registered"));
    }

    #[test]
    fn test_version_constraint_checked_at_registration() {
        let service = service();
        register_charts(&service);
        let err = service
            .register(
                WidgetDefinition::new("v2_report", "Report")
                    .depends_on(WidgetDependency::new("analytics_core").with_version("^2.0.0")),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WidgetError::Registration(RegistrationError::InvalidDependencies { .. })
        ));
    }

    #[test]
    fn test_verify_catalog_reports_dangling_dependencies() {
        let service = service();
        service
            .register(WidgetDefinition::new("chart", "Chart").depends_on("formatter"))
            .unwrap();
        assert_eq!(
            service.verify_catalog(),
            vec!["chart: Dependency 'formatter' is not registered"]
        );
        service.register(WidgetDefinition::new("formatter", "Formatter")).unwrap();
        assert!(service.verify_catalog().is_empty());
    }

    #[test]
    fn test_selection_missing_dependencies() {
        let service = service();
        register_charts(&service);
        let result = service.validate_user_widget_selection(&ids(&["advanced_dashboard"]), None);
        assert!(!result.valid);
        let missing: Vec<_> = result
            .errors
            .iter()
            .filter_map(|e| match &e.kind {
                SelectionIssueKind::MissingDependency { dependency } => Some(dependency.as_str()),
                _ => None,
            })
            .collect();
        assert!(missing.contains(&"analytics_core"));
        assert!(missing.contains(&"basic_chart"));
        assert!(result.loading_order.is_none());
    }

    #[test]
    fn test_selection_valid_has_loading_order() {
        let service = service();
        register_charts(&service);
        let result = service.validate_user_widget_selection(
            &ids(&[
                "advanced_dashboard",
                "basic_chart",
                "analytics_core",
                "data_formatter",
                "basic_chart",
            ]),
            None,
        );
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, SelectionIssueKind::DuplicateWidget);
        assert_eq!(
            result.loading_order.unwrap(),
            ids(&["data_formatter", "analytics_core", "basic_chart", "advanced_dashboard"])
        );
    }

    #[test]
    fn test_selection_conflicts_unknown_and_version_mismatch() {
        let service = service();
        register_charts(&service);
        service
            .register(WidgetDefinition::new("theme_dark", "Dark").conflicts_with("theme_light"))
            .unwrap();
        service.register(WidgetDefinition::new("theme_light", "Light")).unwrap();
        // downgrade after advanced_dashboard declared >=1.2.0
        service
            .register(WidgetDefinition::new("analytics_core", "Analytics Core").with_version("1.0.0"))
            .unwrap();

        let result = service.validate_user_widget_selection(
            &ids(&[
                "theme_dark",
                "theme_light",
                "ghost",
                "advanced_dashboard",
                "analytics_core",
                "basic_chart",
                "data_formatter",
            ]),
            None,
        );
        assert!(!result.valid);
        let kinds: Vec<_> = result.errors.iter().map(|e| &e.kind).collect();
        assert!(kinds.contains(&&SelectionIssueKind::UnknownWidget));
        assert!(kinds.contains(&&SelectionIssueKind::Conflict {
            other: "theme_light".into()
        }));
        assert!(kinds.contains(&&SelectionIssueKind::VersionMismatch {
            dependency: "analytics_core".into(),
            constraint: ">=1.2.0".into(),
            found: "1.0.0".into(),
        }));
    }

    #[test]
    fn test_selection_permissions_and_flags() {
        let service = service();
        service.flags().register_flag(FeatureFlag::always("beta").disabled());
        service.flags().register_flag(FeatureFlag::always("sparkle").disabled());
        service
            .register(
                WidgetDefinition::new("admin_panel", "Admin")
                    .with_role_rule(RolePermissionRule {
                        roles: vec!["admin".into()],
                        ..Default::default()
                    })
                    .with_flag(FlagRequirement::optional("sparkle")),
            )
            .unwrap();
        service
            .register(WidgetDefinition::new("beta_widget", "Beta").with_flag(FlagRequirement::required("beta")))
            .unwrap();

        let user = WidgetUser::new("u1");
        let result =
            service.validate_user_widget_selection(&ids(&["admin_panel", "beta_widget"]), Some(&user));
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(
            result.errors[0].kind,
            SelectionIssueKind::PermissionDenied { action: "view".into() }
        );
        assert_eq!(
            result.errors[1].kind,
            SelectionIssueKind::FeatureDisabled { flag: "beta".into() }
        );
        assert_eq!(
            result.warnings[0].kind,
            SelectionIssueKind::OptionalFeatureDisabled { flag: "sparkle".into() }
        );
    }

    #[test]
    fn test_can_access_is_cached_until_cleared() {
        let service = service();
        service.flags().register_flag(FeatureFlag::always("beta"));
        service
            .register(WidgetDefinition::new("beta_widget", "Beta").with_flag(FlagRequirement::required("beta")))
            .unwrap();
        let user = WidgetUser::new("u1");
        assert!(service.can_access(&user, "beta_widget", "view").unwrap());

        service.flags().register_flag(FeatureFlag::always("beta").disabled());
        assert!(service.can_access(&user, "beta_widget", "view").unwrap());

        service.clear_user_cache(Some("u1"));
        assert!(!service.can_access(&user, "beta_widget", "view").unwrap());
    }

    #[test]
    fn test_clear_user_cache_leaves_other_users() {
        let service = service();
        service.flags().register_flag(FeatureFlag::always("beta"));
        service
            .register(WidgetDefinition::new("beta_widget", "Beta").with_flag(FlagRequirement::required("beta")))
            .unwrap();
        let alice = WidgetUser::new("alice");
        let bob = WidgetUser::new("bob");
        assert!(service.can_access(&alice, "beta_widget", "view").unwrap());
        assert!(service.can_access(&bob, "beta_widget", "view").unwrap());

        service.flags().register_flag(FeatureFlag::always("beta").disabled());
        service.clear_user_widget_permission_cache(Some("alice"), Some("beta_widget"));
        assert!(!service.can_access(&alice, "beta_widget", "view").unwrap());
        assert!(service.can_access(&bob, "beta_widget", "view").unwrap());

        service.clear_user_widget_permission_cache(None, None);
        assert!(!service.can_access(&bob, "beta_widget", "view").unwrap());
    }

    #[test]
    fn test_registration_invalidates_cache() {
        let service = service();
        service.register(WidgetDefinition::new("reports", "Reports")).unwrap();
        let user = WidgetUser::new("u1");
        assert!(service.can_access(&user, "reports", "view").unwrap());

        service
            .register(
                WidgetDefinition::new("reports", "Reports")
                    .with_permissions(WidgetPermissions::Flat(vec!["reports.view".into()])),
            )
            .unwrap();
        assert!(!service.can_access(&user, "reports", "view").unwrap());
    }

    #[test]
    fn test_user_widgets_with_dependencies() {
        let service = service();
        register_charts(&service);
        // analytics_core is restricted, so advanced_dashboard is not usable
        service
            .register(
                WidgetDefinition::new("analytics_core", "Analytics Core")
                    .with_version("1.4.0")
                    .with_permissions(WidgetPermissions::Flat(vec!["analytics.view".into()])),
            )
            .unwrap();

        let user = WidgetUser::new("u1");
        let widgets: Vec<String> = service
            .get_user_widgets_with_dependencies(&user, "view")
            .unwrap()
            .iter()
            .map(|w| w.id.clone())
            .collect();
        assert_eq!(widgets, ids(&["data_formatter", "basic_chart"]));

        let accessible = service.get_accessible_widgets(&user, "view");
        assert!(accessible.contains_key("advanced_dashboard"));
        assert!(!accessible.contains_key("analytics_core"));

        let analyst = WidgetUser::new("u2").with_permissions(&["analytics.view"]);
        let widgets = service.get_user_widgets_with_dependencies(&analyst, "view").unwrap();
        assert_eq!(widgets.len(), 4);
        assert_eq!(widgets.last().unwrap().id, "advanced_dashboard");
    }

    #[test]
    fn test_dependency_permissions_enforced() {
        let service = service();
        service
            .register(WidgetDefinition::new("price_feed", "Price Feed"))
            .unwrap();
        service
            .register(
                WidgetDefinition::new("ticker", "Ticker").depends_on(
                    WidgetDependency::new("price_feed").with_permissions(&["market.data"]),
                ),
            )
            .unwrap();
        service
            .register(WidgetDefinition::new("watchlist", "Watchlist").depends_on("ticker"))
            .unwrap();

        let viewer = WidgetUser::new("u1");
        let result = service
            .validate_user_widget_selection(&ids(&["price_feed", "ticker"]), Some(&viewer));
        assert!(!result.valid);
        assert_eq!(
            result.errors[0].kind,
            SelectionIssueKind::DependencyPermissionDenied {
                dependency: "price_feed".into(),
                permissions: vec!["market.data".into()],
            }
        );
        assert_eq!(result.errors[0].widget_id, "ticker");

        let widgets: Vec<String> = service
            .get_user_widgets_with_dependencies(&viewer, "view")
            .unwrap()
            .iter()
            .map(|w| w.id.clone())
            .collect();
        assert_eq!(widgets, ids(&["price_feed"]));

        let trader = WidgetUser::new("u2").with_permissions(&["market.data"]);
        assert!(service
            .validate_user_widget_selection(&ids(&["price_feed", "ticker"]), Some(&trader))
            .valid);
        let widgets = service.get_user_widgets_with_dependencies(&trader, "view").unwrap();
        assert_eq!(widgets.len(), 3);
    }

    #[test]
    fn test_bulk_permissions_unknown_widget() {
        let service = service();
        service.register(WidgetDefinition::new("clock", "Clock")).unwrap();
        let user = WidgetUser::new("u1");
        assert_eq!(
            service.check_bulk_permissions(&user, &ids(&["clock", "ghost"]), "view"),
            Err(WidgetError::UnknownWidget("ghost".into()))
        );
        assert_eq!(
            service.check_bulk_permissions(&user, &ids(&["clock"]), "view").unwrap()["clock"],
            true
        );
    }

    #[test]
    fn test_permission_audit_includes_flags() {
        let service = service();
        service.flags().register_flag(FeatureFlag::always("beta").disabled());
        service
            .register(
                WidgetDefinition::new("trading_dashboard", "Trading")
                    .with_custom_rule(CustomPermissionRule::TimeBased(TimeWindowRule {
                        timezone: Some("America/New_York".into()),
                        time_ranges: vec![TimeRange::new("09:30", "16:00")],
                        days_of_week: (1..=5).map(DayOfWeek::Number).collect(),
                    }))
                    .with_flag(FlagRequirement::required("beta")),
            )
            .unwrap();

        let audit = service
            .permission_audit(&WidgetUser::new("u1"), "trading_dashboard", "view")
            .unwrap();
        assert_eq!(audit.check_names(), vec!["time_based[0]", "feature_flag:beta"]);
        assert_eq!(audit.check("time_based[0]"), Some(true));
        assert_eq!(audit.check("feature_flag:beta"), Some(false));
        assert!(!audit.result);
    }

    #[test]
    fn test_selection_configuration() {
        let service = service();
        service
            .register(
                WidgetDefinition::new("weather", "Weather")
                    .with_field("city", FieldDescriptor::new(FieldType::Text).required())
                    .with_field(
                        "units",
                        FieldDescriptor::new(FieldType::Select).with_options(&["metric", "imperial"]),
                    )
                    .with_field("refresh", FieldDescriptor::new(FieldType::Number)),
            )
            .unwrap();
        service.register(WidgetDefinition::new("clock", "Clock")).unwrap();

        let selection: UserWidgetSelection = serde_json::from_value(json!({
            "user_id": "u1",
            "widgets": ["weather", "clock"],
            "configs": {"weather": {"units": "kelvin", "refresh": "30", "extra": 1}}
        }))
        .unwrap();

        let errors = service.validate_selection_configuration(&selection).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["weather"]["city"], vec!["City is required"]);
        assert!(errors["weather"].contains_key("units"));

        let sanitized = service.sanitize_selection(&selection);
        assert_eq!(
            Value::Object(sanitized.configs["weather"].clone()),
            json!({"units": "kelvin", "refresh": 30})
        );
        assert_eq!(sanitized.widgets, selection.widgets);
    }
}
