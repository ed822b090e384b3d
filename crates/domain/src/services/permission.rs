//! Permission evaluation.
//!
//! Layers are evaluated in a fixed order:
//! 1. `denied_roles` of the role rules that apply to the action
//! 2. role allow (`role_permissions`), recorded on its own
//! 3. required `permissions`, which deny when the user lacks any of them
//! 4. `explicit_allow`: when either layer is declared, at least one must grant
//! 5. tenant scoping, when the widget requires a tenant
//! 6. custom rules in declaration order (`time_based[i]`, `callback:<name>`)
//!
//! [`PermissionEvaluator::has_permission`] stops at the first denial; the
//! audit trail evaluates every layer. A widget that declares nothing is open.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use metrics::counter;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{WidgetError, WidgetResult};
use crate::models::{
    AuditCheck, CustomPermissionRule, PermissionAudit, TimeWindowRule, WidgetDefinition,
    WidgetUser,
};
use crate::services::clock::Clock;
use crate::services::registry::WidgetRegistry;
use shared::validation::{error_message, parse_time_of_day};

/// Name of the built-in attribute predicate.
pub const ATTRIBUTE_EQUALS: &str = "attribute_equals";

/// A named check referenced by `callback` rules.
pub trait PermissionPredicate: Send + Sync {
    fn evaluate(&self, user: &WidgetUser, widget: &WidgetDefinition, params: &Value) -> bool;
}

impl<F> PermissionPredicate for F
where
    F: Fn(&WidgetUser, &WidgetDefinition, &Value) -> bool + Send + Sync,
{
    fn evaluate(&self, user: &WidgetUser, widget: &WidgetDefinition, params: &Value) -> bool {
        self(user, widget, params)
    }
}

/// `{"attribute": "region", "value": "eu"}` passes when the user attribute
/// equals `value`, or is one of the values when `value` is a list.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeEquals;

impl PermissionPredicate for AttributeEquals {
    fn evaluate(&self, user: &WidgetUser, _widget: &WidgetDefinition, params: &Value) -> bool {
        let Some(attribute) = params.get("attribute").and_then(Value::as_str) else {
            return false;
        };
        let Some(actual) = user.attributes.get(attribute) else {
            return false;
        };
        match params.get("value") {
            Some(Value::Array(allowed)) => allowed.contains(actual),
            Some(expected) => expected == actual,
            None => false,
        }
    }
}

pub struct PermissionEvaluator {
    registry: Arc<WidgetRegistry>,
    predicates: RwLock<HashMap<String, Arc<dyn PermissionPredicate>>>,
    clock: Arc<dyn Clock>,
    default_timezone: Tz,
}

impl PermissionEvaluator {
    pub fn new(registry: Arc<WidgetRegistry>, clock: Arc<dyn Clock>, default_timezone: Tz) -> Self {
        let mut predicates: HashMap<String, Arc<dyn PermissionPredicate>> = HashMap::new();
        predicates.insert(ATTRIBUTE_EQUALS.to_string(), Arc::new(AttributeEquals));
        Self {
            registry,
            predicates: RwLock::new(predicates),
            clock,
            default_timezone,
        }
    }

    /// Registers or replaces a named predicate for `callback` rules.
    pub fn register_predicate<P>(&self, name: impl Into<String>, predicate: P)
    where
        P: PermissionPredicate + 'static,
    {
        let name = name.into();
        tracing::debug!(predicate = %name, "Permission predicate registered");
        self.predicates.write().insert(name, Arc::new(predicate));
    }

    pub fn has_predicate(&self, name: &str) -> bool {
        self.predicates.read().contains_key(name)
    }

    pub fn has_permission(
        &self,
        user: &WidgetUser,
        widget_id: &str,
        action: &str,
    ) -> WidgetResult<bool> {
        let widget = self.lookup(widget_id)?;
        Ok(self.evaluate_definition(user, &widget, action))
    }

    pub fn get_permission_audit_trail(
        &self,
        user: &WidgetUser,
        widget_id: &str,
        action: &str,
    ) -> WidgetResult<PermissionAudit> {
        let widget = self.lookup(widget_id)?;
        Ok(self.audit_definition(user, &widget, action))
    }

    pub fn check_bulk_permissions(
        &self,
        user: &WidgetUser,
        widget_ids: &[String],
        action: &str,
    ) -> WidgetResult<BTreeMap<String, bool>> {
        let widgets = widget_ids
            .iter()
            .map(|id| self.lookup(id))
            .collect::<WidgetResult<Vec<_>>>()?;
        Ok(widgets
            .into_iter()
            .map(|w| {
                let allowed = self.evaluate_definition(user, &w, action);
                (w.id.clone(), allowed)
            })
            .collect())
    }

    pub fn get_accessible_widgets(
        &self,
        user: &WidgetUser,
        action: &str,
    ) -> BTreeMap<String, Arc<WidgetDefinition>> {
        self.registry
            .all(None)
            .into_iter()
            .filter(|w| self.evaluate_definition(user, w, action))
            .map(|w| (w.id.clone(), w))
            .collect()
    }

    /// Short-circuiting decision for an already resolved definition.
    pub fn evaluate_definition(&self, user: &WidgetUser, widget: &WidgetDefinition, action: &str) -> bool {
        let allowed = self.run(user, widget, action, false).result;
        counter!(
            "widget_permission_checks_total",
            "result" => if allowed { "allowed" } else { "denied" }
        )
        .increment(1);
        tracing::debug!(
            user_id = %user.id,
            widget_id = %widget.id,
            action = %action,
            allowed,
            "Permission evaluated"
        );
        allowed
    }

    /// Full audit trail for an already resolved definition.
    pub fn audit_definition(
        &self,
        user: &WidgetUser,
        widget: &WidgetDefinition,
        action: &str,
    ) -> PermissionAudit {
        self.run(user, widget, action, true)
    }

    /// Structural problems with a definition's custom rules.
    pub fn validate_rules(&self, widget: &WidgetDefinition) -> Vec<String> {
        let mut errors = Vec::new();
        for (index, rule) in widget.custom_permissions.iter().enumerate() {
            let name = rule.check_name(index);
            match rule {
                CustomPermissionRule::TimeBased(window) => {
                    if let Some(tz) = &window.timezone {
                        if tz.parse::<Tz>().is_err() {
                            errors.push(format!("{}: unknown timezone '{}'", name, tz));
                        }
                    }
                    for range in &window.time_ranges {
                        match (parse_time_of_day(&range.start), parse_time_of_day(&range.end)) {
                            (Ok(start), Ok(end)) if start == end => errors.push(format!(
                                "{}: time range {}-{} is empty",
                                name, range.start, range.end
                            )),
                            (Ok(_), Ok(_)) => {}
                            (Err(e), _) | (_, Err(e)) => {
                                errors.push(format!("{}: {}", name, error_message(&e)))
                            }
                        }
                    }
                    for day in &window.days_of_week {
                        if day.to_weekday().is_none() {
                            errors.push(format!("{}: invalid day of week {:?}", name, day));
                        }
                    }
                }
                CustomPermissionRule::Callback(callback) => {
                    if callback.predicate.trim().is_empty() {
                        errors.push(format!("{}: predicate name is required", name));
                    }
                }
            }
        }
        errors
    }

    fn lookup(&self, widget_id: &str) -> WidgetResult<Arc<WidgetDefinition>> {
        self.registry
            .get(widget_id)
            .ok_or_else(|| WidgetError::UnknownWidget(widget_id.to_string()))
    }

    fn run(
        &self,
        user: &WidgetUser,
        widget: &WidgetDefinition,
        action: &str,
        exhaustive: bool,
    ) -> PermissionAudit {
        let mut trail = Trail {
            checks: Vec::new(),
            denied: false,
        };

        let rules: Vec<_> = widget
            .role_permissions
            .iter()
            .filter(|r| r.applies_to(action))
            .collect();

        let denied_roles: Vec<String> = rules
            .iter()
            .flat_map(|r| r.denied_roles.iter().cloned())
            .collect();
        if !denied_roles.is_empty() {
            trail.decisive("denied_roles", !user.has_any_role(&denied_roles));
        }

        if exhaustive || !trail.denied {
            let allowed_roles: Vec<String> = rules
                .iter()
                .flat_map(|r| r.roles.iter().cloned())
                .collect();
            let role_allow = (!allowed_roles.is_empty()).then(|| user.has_any_role(&allowed_roles));
            if let Some(passed) = role_allow {
                trail.informational("role_permissions", passed);
            }

            let permission_allow = widget
                .permissions
                .required_for(action)
                .map(|required| user.has_all_permissions(required));
            if let Some(passed) = permission_allow {
                trail.decisive("permissions", passed);
            }

            if role_allow.is_some() || permission_allow.is_some() {
                let granted = role_allow.unwrap_or(false) || permission_allow.unwrap_or(false);
                trail.decisive("explicit_allow", granted);
            }
        }

        if let Some(tenant) = widget.tenant_permissions.as_ref().filter(|t| t.require_tenant) {
            if exhaustive || !trail.denied {
                let passed = user.tenant_id.is_some()
                    && user.has_all_permissions(&tenant.permissions)
                    && (tenant.roles.is_empty() || user.has_any_role(&tenant.roles));
                trail.decisive("tenant", passed);
            }
        }

        for (index, rule) in widget.custom_permissions.iter().enumerate() {
            if !exhaustive && trail.denied {
                break;
            }
            let passed = match rule {
                CustomPermissionRule::TimeBased(window) => self.within_window(window, self.clock.now()),
                CustomPermissionRule::Callback(callback) => {
                    let predicate = self.predicates.read().get(&callback.predicate).cloned();
                    match predicate {
                        Some(predicate) => predicate.evaluate(user, widget, &callback.params),
                        None => {
                            tracing::warn!(
                                widget_id = %widget.id,
                                predicate = %callback.predicate,
                                "Unregistered permission predicate, denying"
                            );
                            false
                        }
                    }
                }
            };
            trail.decisive(&rule.check_name(index), passed);
        }

        if trail.checks.is_empty() {
            trail.informational("open_access", true);
        }

        PermissionAudit {
            widget_id: widget.id.clone(),
            user_id: user.id.clone(),
            action: action.to_string(),
            checks: trail.checks,
            result: !trail.denied,
        }
    }

    fn within_window(&self, window: &TimeWindowRule, now: DateTime<Utc>) -> bool {
        let tz = match &window.timezone {
            Some(name) => match name.parse::<Tz>() {
                Ok(tz) => tz,
                Err(_) => {
                    tracing::warn!(timezone = %name, "Unknown timezone in time rule, denying");
                    return false;
                }
            },
            None => self.default_timezone,
        };
        let local = now.with_timezone(&tz);

        if !window.days_of_week.is_empty()
            && !window
                .days_of_week
                .iter()
                .any(|d| d.to_weekday() == Some(local.weekday()))
        {
            return false;
        }

        if window.time_ranges.is_empty() {
            return true;
        }
        let time = local.time();
        window.time_ranges.iter().any(|range| {
            match (parse_time_of_day(&range.start), parse_time_of_day(&range.end)) {
                (Ok(start), Ok(end)) if start <= end => start <= time && time < end,
                (Ok(start), Ok(end)) => time >= start || time < end,
                _ => false,
            }
        })
    }
}

struct Trail {
    checks: Vec<AuditCheck>,
    denied: bool,
}

impl Trail {
    /// Recorded and able to deny.
    fn decisive(&mut self, check: &str, passed: bool) {
        self.informational(check, passed);
        if !passed {
            self.denied = true;
        }
    }

    fn informational(&mut self, check: &str, passed: bool) {
        self.checks.push(AuditCheck {
            check: check.to_string(),
            passed,
        });
    }
}
