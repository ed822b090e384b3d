//! Feature flag models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rollout strategy of a flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    #[default]
    Always,
    Percentage,
    Whitelist,
}

impl std::fmt::Display for RolloutStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutStrategy::Always => write!(f, "always"),
            RolloutStrategy::Percentage => write!(f, "percentage"),
            RolloutStrategy::Whitelist => write!(f, "whitelist"),
        }
    }
}

/// Whitelist conditions; a user matching any list is in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FlagConditions {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub tenant_ids: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl FlagConditions {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
            && self.user_ids.is_empty()
            && self.tenant_ids.is_empty()
            && self.permissions.is_empty()
    }
}

/// A named on/off gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeatureFlag {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: RolloutStrategy,
    /// Rollout percentage (0-100) for the percentage strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default)]
    pub conditions: FlagConditions,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl FeatureFlag {
    /// An enabled flag with the `always` strategy.
    pub fn always(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            strategy: RolloutStrategy::Always,
            value: None,
            conditions: FlagConditions::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn percentage(name: impl Into<String>, percent: f64) -> Self {
        Self {
            strategy: RolloutStrategy::Percentage,
            value: Some(percent),
            ..Self::always(name)
        }
    }

    pub fn whitelist(name: impl Into<String>, conditions: FlagConditions) -> Self {
        Self {
            strategy: RolloutStrategy::Whitelist,
            conditions,
            ..Self::always(name)
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Rollout percentage clamped to `0..=100`.
    pub fn rollout_percentage(&self) -> f64 {
        self.value.unwrap_or(0.0).clamp(0.0, 100.0)
    }
}

/// Who a widget's flag is evaluated for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagContext {
    #[default]
    User,
    Global,
}

/// A widget's reference to a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FlagRequirementDeclaration")]
pub struct FlagRequirement {
    pub name: String,
    pub context: FlagContext,
    /// Required flags make the widget unavailable when off.
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FlagRequirementDeclaration {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        context: FlagContext,
        #[serde(default = "default_required")]
        required: bool,
    },
}

fn default_required() -> bool {
    true
}

impl From<FlagRequirementDeclaration> for FlagRequirement {
    fn from(declaration: FlagRequirementDeclaration) -> Self {
        match declaration {
            FlagRequirementDeclaration::Name(name) => FlagRequirement::required(name),
            FlagRequirementDeclaration::Detailed {
                name,
                context,
                required,
            } => FlagRequirement {
                name,
                context,
                required,
            },
        }
    }
}

impl FlagRequirement {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: FlagContext::User,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }

    pub fn global(mut self) -> Self {
        self.context = FlagContext::Global;
        self
    }
}
