//! Permission declarations carried by widget definitions, and the audit
//! trail produced when they are evaluated.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Action used when a caller does not name one.
pub const DEFAULT_ACTION: &str = "view";

/// Wildcard accepted in `actions` lists.
pub const ANY_ACTION: &str = "*";

/// Required permission strings, either for every action or per action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetPermissions {
    /// Every listed permission is required for every action.
    Flat(Vec<String>),
    /// Permissions required for a given action; actions not listed are unrestricted.
    ByAction(BTreeMap<String, Vec<String>>),
}

impl Default for WidgetPermissions {
    fn default() -> Self {
        WidgetPermissions::Flat(Vec::new())
    }
}

impl WidgetPermissions {
    /// Permissions required for `action`, or `None` when the action is unrestricted.
    pub fn required_for(&self, action: &str) -> Option<&[String]> {
        match self {
            WidgetPermissions::Flat(list) if list.is_empty() => None,
            WidgetPermissions::Flat(list) => Some(list),
            WidgetPermissions::ByAction(map) => map
                .get(action)
                .filter(|list| !list.is_empty())
                .map(|list| list.as_slice()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            WidgetPermissions::Flat(list) => list.is_empty(),
            WidgetPermissions::ByAction(map) => map.values().all(|l| l.is_empty()),
        }
    }
}

/// Role-based allow/deny rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RolePermissionRule {
    #[serde(default)]
    pub roles: Vec<String>,
    /// Actions the rule covers; empty means every action.
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub denied_roles: Vec<String>,
}

impl RolePermissionRule {
    pub fn applies_to(&self, action: &str) -> bool {
        self.actions.is_empty() || self.actions.iter().any(|a| a == action || a == ANY_ACTION)
    }
}

/// Tenant scoping requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TenantPermissions {
    #[serde(default)]
    pub require_tenant: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A custom rule, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomPermissionRule {
    TimeBased(TimeWindowRule),
    Callback(CallbackRule),
}

impl CustomPermissionRule {
    /// Name recorded in the audit trail for the rule at `index`.
    pub fn check_name(&self, index: usize) -> String {
        match self {
            CustomPermissionRule::TimeBased(_) => format!("time_based[{}]", index),
            CustomPermissionRule::Callback(rule) => format!("callback:{}", rule.predicate),
        }
    }
}

/// Access limited to time windows on given days.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimeWindowRule {
    /// IANA timezone name; the evaluator's default timezone when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,
    #[serde(default)]
    pub days_of_week: Vec<DayOfWeek>,
}

/// `HH:MM` range. Start is inclusive, end exclusive; an end earlier than the
/// start wraps past midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

impl TimeRange {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }
}

/// Day given either as a name (`"monday"`, `"Mon"`) or an ISO number
/// (1 = Monday .. 7 = Sunday, with 0 also accepted for Sunday).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DayOfWeek {
    Number(u8),
    Name(String),
}

impl DayOfWeek {
    pub fn to_weekday(&self) -> Option<Weekday> {
        match self {
            DayOfWeek::Number(n) => match n {
                1 => Some(Weekday::Mon),
                2 => Some(Weekday::Tue),
                3 => Some(Weekday::Wed),
                4 => Some(Weekday::Thu),
                5 => Some(Weekday::Fri),
                6 => Some(Weekday::Sat),
                0 | 7 => Some(Weekday::Sun),
                _ => None,
            },
            DayOfWeek::Name(name) => name.trim().parse::<Weekday>().ok(),
        }
    }
}

impl From<&str> for DayOfWeek {
    fn from(name: &str) -> Self {
        DayOfWeek::Name(name.to_string())
    }
}

/// Named predicate resolved from the evaluator's predicate registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CallbackRule {
    #[serde(alias = "callback", alias = "name")]
    pub predicate: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One evaluated check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuditCheck {
    pub check: String,
    pub passed: bool,
}

/// Ordered record of each check leading to an access decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PermissionAudit {
    pub widget_id: String,
    pub user_id: String,
    pub action: String,
    pub checks: Vec<AuditCheck>,
    pub result: bool,
}

impl PermissionAudit {
    /// Outcome of the named check, if it was evaluated.
    pub fn check(&self, name: &str) -> Option<bool> {
        self.checks.iter().find(|c| c.check == name).map(|c| c.passed)
    }

    /// Check names in evaluation order.
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.check.as_str()).collect()
    }
}
