//! HTTP middleware components.

pub mod logging;
pub mod metrics;

pub use self::metrics::{init_metrics, metrics_handler, metrics_middleware, record_catalog_size};
