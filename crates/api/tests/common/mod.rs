//! Common test utilities for integration tests.
//!
//! Builds the router around an in-memory engine loaded with a small sample
//! catalog, so tests need no files or external services.

// Not every helper is used by every test binary
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use domain::models::{FeatureFlag, FlagConditions, WidgetDefinition};
use serde_json::json;
use std::sync::Arc;
use widget_engine_api::{
    app::create_app,
    catalog::{build_service, register_catalog},
    config::Config,
};

/// Configuration with embedded defaults and the sample feature flags.
pub fn test_config() -> Config {
    let mut config = Config::load_with_overrides(&[("logging.level", "warn")])
        .expect("Failed to load test config");
    config.feature_flags = vec![
        FeatureFlag::whitelist(
            "beta_panel",
            FlagConditions {
                user_ids: vec!["tester".into()],
                ..Default::default()
            },
        ),
        FeatureFlag::always("charts_v2"),
    ];
    config
}

/// Widgets registered by `create_test_app`, in registration order.
pub fn sample_catalog() -> Vec<WidgetDefinition> {
    serde_json::from_value(json!([
        {
            "id": "data_source",
            "title": "Data Source",
            "category": "data",
            "version": "1.2.0"
        },
        {
            "id": "chart",
            "title": "Chart",
            "category": "analytics",
            "dependencies": [{ "id": "data_source", "version_constraint": "^1.0" }],
            "permissions": ["reports.view"],
            "feature_flags": ["charts_v2"],
            "config_schema": {
                "refresh_interval": {
                    "type": "number",
                    "label": "Refresh interval",
                    "required": true,
                    "min": 5,
                    "max": 3600
                },
                "theme": {
                    "type": "select",
                    "options": ["light", "dark"],
                    "default": "light"
                }
            }
        },
        {
            "id": "table",
            "title": "Table",
            "category": "analytics",
            "dependencies": ["data_source"],
            "conflicts": ["chart_legacy"]
        },
        {
            "id": "chart_legacy",
            "title": "Legacy Chart",
            "category": "analytics"
        },
        {
            "id": "beta_panel",
            "title": "Beta Panel",
            "feature_flags": ["beta_panel"]
        },
        {
            "id": "admin_console",
            "title": "Admin Console",
            "category": "admin",
            "permissions": ["admin.access"],
            "role_permissions": [{ "denied_roles": ["guest"] }]
        }
    ]))
    .expect("Sample catalog must deserialize")
}

/// Router over a fresh engine holding the sample catalog.
pub fn create_test_app() -> Router {
    let config = test_config();
    let widgets = build_service(&config).expect("Failed to build widget service");
    let report = register_catalog(&widgets, sample_catalog());
    assert!(report.rejected.is_empty(), "{:?}", report.rejected);
    create_app(config, Arc::new(widgets))
}

pub fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn delete_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}
