//! Startup wiring: builds the engine from configuration and registers the
//! widget catalog file.

use domain::models::WidgetDefinition;
use domain::services::WidgetService;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ConfigValidationError};
use crate::middleware::record_catalog_size;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read widget catalog {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse widget catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigValidationError),
}

/// Outcome of registering a catalog.
#[derive(Debug, Default)]
pub struct CatalogReport {
    pub registered: Vec<String>,
    /// `(widget_id, reason)` for every rejected definition.
    pub rejected: Vec<(String, String)>,
    /// Dependency problems left once the whole catalog is registered.
    pub dependency_issues: Vec<String>,
}

/// Builds the engine, registers configured feature flags, then the catalog.
pub fn build_service(config: &Config) -> Result<WidgetService, CatalogError> {
    let service = WidgetService::new(config.widget_service_config()?);
    for flag in &config.feature_flags {
        service.flags().register_flag(flag.clone());
    }

    let catalog_path = config.widgets.catalog_path.trim();
    if catalog_path.is_empty() {
        info!("No widget catalog configured");
    } else {
        load_catalog(&service, Path::new(catalog_path))?;
    }

    record_catalog_size(service.registry().len(), service.flags().flags().len());
    Ok(service)
}

/// Reads a JSON array of widget definitions and registers it.
pub fn load_catalog(service: &WidgetService, path: &Path) -> Result<CatalogReport, CatalogError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let definitions: Vec<WidgetDefinition> =
        serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let report = register_catalog(service, definitions);
    info!(
        path = %path.display(),
        registered = report.registered.len(),
        rejected = report.rejected.len(),
        "Widget catalog loaded"
    );
    Ok(report)
}

/// Registers definitions in file order. A rejected definition is logged and
/// skipped; the rest of the catalog still loads.
pub fn register_catalog(
    service: &WidgetService,
    definitions: impl IntoIterator<Item = WidgetDefinition>,
) -> CatalogReport {
    let mut report = CatalogReport::default();
    for definition in definitions {
        let widget_id = definition.id.clone();
        match service.register(definition) {
            Ok(()) => report.registered.push(widget_id),
            Err(e) => {
                warn!(widget_id = %widget_id, error = %e, "Catalog widget rejected");
                report.rejected.push((widget_id, e.to_string()));
            }
        }
    }

    report.dependency_issues = service.verify_catalog();
    for issue in &report.dependency_issues {
        warn!(issue = %issue, "Unresolved catalog dependency");
    }
    report
}
