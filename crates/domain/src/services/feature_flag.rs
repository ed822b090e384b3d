//! Feature flag evaluation.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{FeatureFlag, FlagContext, RolloutStrategy, WidgetDefinition, WidgetUser};
use shared::crypto::rollout_bucket;

/// Identifier hashed for percentage rollouts when there is no user.
pub const ANONYMOUS: &str = "anonymous";

/// Flags of one widget that evaluated to off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FlagEvaluation {
    /// Required flags that are off; the widget is unavailable.
    pub blocking: Vec<String>,
    /// Optional flags that are off.
    pub optional: Vec<String>,
}

impl FlagEvaluation {
    pub fn is_available(&self) -> bool {
        self.blocking.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct FeatureFlagEvaluator {
    flags: RwLock<BTreeMap<String, FeatureFlag>>,
}

impl FeatureFlagEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(flags: impl IntoIterator<Item = FeatureFlag>) -> Self {
        let evaluator = Self::new();
        for flag in flags {
            evaluator.register_flag(flag);
        }
        evaluator
    }

    /// Registers or replaces a flag.
    pub fn register_flag(&self, flag: FeatureFlag) {
        tracing::debug!(flag = %flag.name, strategy = %flag.strategy, enabled = flag.enabled, "Feature flag registered");
        self.flags.write().insert(flag.name.clone(), flag);
    }

    pub fn flag(&self, name: &str) -> Option<FeatureFlag> {
        self.flags.read().get(name).cloned()
    }

    /// All flags ordered by name.
    pub fn flags(&self) -> Vec<FeatureFlag> {
        self.flags.read().values().cloned().collect()
    }

    /// Whether `name` is on for `user`. Unknown flags are off.
    pub fn is_enabled(&self, name: &str, user: Option<&WidgetUser>) -> bool {
        let flags = self.flags.read();
        let Some(flag) = flags.get(name) else {
            tracing::debug!(flag = %name, "Unknown feature flag evaluated as disabled");
            return false;
        };
        if !flag.enabled {
            return false;
        }

        match flag.strategy {
            RolloutStrategy::Always => true,
            RolloutStrategy::Percentage => {
                let identifier = user.map_or(ANONYMOUS, |u| u.id.as_str());
                f64::from(rollout_bucket(&flag.name, identifier)) < flag.rollout_percentage()
            }
            RolloutStrategy::Whitelist => {
                let Some(user) = user else {
                    return false;
                };
                let conditions = &flag.conditions;
                conditions.user_ids.iter().any(|id| *id == user.id)
                    || user.has_any_role(&conditions.roles)
                    || user
                        .tenant_id
                        .as_ref()
                        .map_or(false, |t| conditions.tenant_ids.contains(t))
                    || user.has_any_permission(&conditions.permissions)
            }
        }
    }

    pub fn evaluate_widget_flags(
        &self,
        widget: &WidgetDefinition,
        user: Option<&WidgetUser>,
    ) -> FlagEvaluation {
        let mut evaluation = FlagEvaluation::default();
        for requirement in &widget.feature_flags {
            let subject = match requirement.context {
                FlagContext::User => user,
                FlagContext::Global => None,
            };
            if self.is_enabled(&requirement.name, subject) {
                continue;
            }
            if requirement.required {
                evaluation.blocking.push(requirement.name.clone());
            } else {
                evaluation.optional.push(requirement.name.clone());
            }
        }
        evaluation
    }
}
