//! Widget dependency and permission resolution engine.
//!
//! This crate contains:
//! - Domain models (WidgetDefinition, dependencies, permission rules, flags)
//! - The engine services (registry, resolver, schema validator, permission
//!   and feature flag evaluators, and the WidgetService facade)
//! - Domain error types

pub mod error;
pub mod models;
pub mod services;

pub use error::{RegistrationError, WidgetError, WidgetResult};
