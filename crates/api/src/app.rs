use axum::{
    body::Body,
    http::Request,
    middleware,
    routing::{delete, get, post},
    Router,
};
use domain::services::WidgetService;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware};
use crate::routes::{health, widgets};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub widgets: Arc<WidgetService>,
}

pub fn create_app(config: Config, widgets: Arc<WidgetService>) -> Router {
    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        widgets,
    };

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let widget_routes = Router::new()
        .route(
            "/api/v1/widgets",
            get(widgets::list_widgets).post(widgets::register_widget),
        )
        .route("/api/v1/widgets/categories", get(widgets::list_categories))
        .route("/api/v1/widgets/graph", get(widgets::dependency_graph))
        .route("/api/v1/widgets/schema", get(widgets::config_json_schema))
        .route("/api/v1/widgets/flags", get(widgets::list_flags))
        .route("/api/v1/widgets/loading-order", post(widgets::loading_order))
        .route(
            "/api/v1/widgets/compatibility",
            post(widgets::check_compatibility),
        )
        .route(
            "/api/v1/widgets/selection/validate",
            post(widgets::validate_selection),
        )
        .route(
            "/api/v1/widgets/permissions/bulk",
            post(widgets::check_bulk_permissions),
        )
        .route("/api/v1/widgets/accessible", post(widgets::accessible_widgets))
        .route("/api/v1/widgets/cache", delete(widgets::clear_cache))
        .route(
            "/api/v1/widgets/cache/users/:user_id",
            delete(widgets::clear_user_cache),
        )
        .route("/api/v1/widgets/:widget_id", get(widgets::get_widget))
        .route(
            "/api/v1/widgets/:widget_id/dependencies",
            get(widgets::get_dependencies),
        )
        .route(
            "/api/v1/widgets/:widget_id/dependents",
            get(widgets::get_dependents),
        )
        .route(
            "/api/v1/widgets/:widget_id/config/validate",
            post(widgets::validate_widget_config),
        )
        .route(
            "/api/v1/widgets/:widget_id/config/form",
            post(widgets::configuration_form),
        )
        .route(
            "/api/v1/widgets/:widget_id/permissions/audit",
            post(widgets::permission_audit),
        );

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(widget_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "request",
                request_id = %request_id,
                method = %request.method(),
                path = %request.uri().path(),
            )
        }))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}
