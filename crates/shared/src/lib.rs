//! Shared utilities for the widget engine.
//!
//! This crate provides leaf functionality used by the other crates:
//! - Stable hashing for percentage rollouts
//! - Common validation logic (ids, versions, times, field formats)

pub mod crypto;
pub mod validation;
