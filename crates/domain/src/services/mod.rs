//! Engine services.
//!
//! Services contain the resolution logic that operates on domain models.

pub mod cache;
pub mod clock;
pub mod config_schema;
pub mod dependency_graph;
pub mod feature_flag;
pub mod permission;
pub mod registry;
pub mod widget;

pub use cache::{CacheKey, CacheScope, CacheValue, InMemoryWidgetCache, WidgetCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config_schema::{ConfigSchemaValidator, FieldErrors, FormField};
pub use dependency_graph::{DependencyIssue, DependencyIssueKind, DependencyResolver};
pub use feature_flag::{FeatureFlagEvaluator, FlagEvaluation};
pub use permission::{AttributeEquals, PermissionEvaluator, PermissionPredicate};
pub use registry::{RegistryState, WidgetRegistry};
pub use widget::{WidgetService, WidgetServiceConfig};
