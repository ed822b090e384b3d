use chrono_tz::Tz;
use domain::models::{FeatureFlag, SizeConstraints, WidgetSize};
use domain::services::WidgetServiceConfig;
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub widgets: WidgetsConfig,
    /// Flags registered with the engine at startup
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WidgetsConfig {
    /// JSON file with widget definitions registered at startup (empty to skip)
    #[serde(default)]
    pub catalog_path: String,

    /// Allowed categories; empty allows any
    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default = "default_width")]
    pub default_width: u32,

    #[serde(default = "default_height")]
    pub default_height: u32,

    #[serde(default = "default_min_dimension")]
    pub min_width: u32,

    #[serde(default = "default_grid_columns")]
    pub max_width: u32,

    #[serde(default = "default_min_dimension")]
    pub min_height: u32,

    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// Columns of the dashboard grid; caps `max_width`
    #[serde(default = "default_grid_columns")]
    pub grid_columns: u32,

    /// IANA timezone for time-based rules that do not name one
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Per-user access cache lifetime; 0 disables caching
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Reject dependencies on widgets that are not registered yet
    #[serde(default)]
    pub strict_dependencies: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_width() -> u32 {
    4
}
fn default_height() -> u32 {
    3
}
fn default_min_dimension() -> u32 {
    1
}
fn default_max_height() -> u32 {
    12
}
fn default_grid_columns() -> u32 {
    12
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_cache_ttl() -> u64 {
    300
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Defaults embedded for file-less loading.
const DEFAULTS: &str = r#"
    [server]
    host = "0.0.0.0"
    port = 8080
    request_timeout_secs = 30

    [logging]
    level = "info"
    format = "json"

    [security]
    cors_origins = []

    [widgets]
    catalog_path = ""
    categories = []
    default_width = 4
    default_height = 3
    min_width = 1
    max_width = 12
    min_height = 1
    max_height = 12
    grid_columns = 12
    default_timezone = "UTC"
    cache_ttl_secs = 300
    strict_dependencies = false
"#;

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with WE__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("WE").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Build a configuration from embedded defaults plus overrides, without
    /// touching the file system. Used by tests and embedding hosts.
    pub fn load_with_overrides(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULTS, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        let widgets = &self.widgets;
        if widgets.default_timezone.trim().is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "WE__WIDGETS__DEFAULT_TIMEZONE must not be empty".to_string(),
            ));
        }
        widgets.timezone()?;

        if widgets.min_width == 0 || widgets.min_height == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Widget dimensions must be at least 1".to_string(),
            ));
        }
        if widgets.min_width > widgets.max_width || widgets.min_height > widgets.max_height {
            return Err(ConfigValidationError::InvalidValue(
                "Minimum widget size cannot exceed maximum widget size".to_string(),
            ));
        }
        if widgets.max_width > widgets.grid_columns {
            return Err(ConfigValidationError::InvalidValue(format!(
                "max_width ({}) cannot exceed grid_columns ({})",
                widgets.max_width, widgets.grid_columns
            )));
        }
        if !(widgets.min_width..=widgets.max_width).contains(&widgets.default_width)
            || !(widgets.min_height..=widgets.max_height).contains(&widgets.default_height)
        {
            return Err(ConfigValidationError::InvalidValue(
                "Default widget size must lie within the size constraints".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    /// Engine settings derived from the `[widgets]` section.
    pub fn widget_service_config(&self) -> Result<WidgetServiceConfig, ConfigValidationError> {
        let widgets = &self.widgets;
        Ok(WidgetServiceConfig {
            categories: widgets.categories.clone(),
            default_size: WidgetSize::new(widgets.default_width, widgets.default_height),
            size_constraints: SizeConstraints {
                min_width: widgets.min_width,
                max_width: widgets.max_width,
                min_height: widgets.min_height,
                max_height: widgets.max_height,
            },
            default_timezone: widgets.timezone()?,
            cache_ttl: chrono::Duration::seconds(widgets.cache_ttl_secs as i64),
            strict_dependencies: widgets.strict_dependencies,
        })
    }
}

impl WidgetsConfig {
    pub fn timezone(&self) -> Result<Tz, ConfigValidationError> {
        self.default_timezone.parse::<Tz>().map_err(|_| {
            ConfigValidationError::InvalidValue(format!(
                "Unknown timezone '{}'",
                self.default_timezone
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load_with_defaults() {
        let config = Config::load_with_overrides(&[]).expect("Failed to load config");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.widgets.default_timezone, "UTC");
        assert!(config.feature_flags.is_empty());
    }

    #[test]
    fn test_config_env_override() {
        let config = Config::load_with_overrides(&[
            ("server.port", "9000"),
            ("logging.level", "debug"),
            ("widgets.default_timezone", "America/New_York"),
        ])
        .expect("Failed to load config");

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.widget_service_config().unwrap().default_timezone,
            chrono_tz::America::New_York
        );
    }

    #[test]
    fn test_config_validation_unknown_timezone() {
        let result = Config::load_with_overrides(&[("widgets.default_timezone", "Mars/Base")]);
        assert!(result.unwrap_err().to_string().contains("Unknown timezone"));
    }

    #[test]
    fn test_config_validation_invalid_size_constraints() {
        let result = Config::load_with_overrides(&[
            ("widgets.min_width", "6"),
            ("widgets.max_width", "4"),
        ]);
        assert!(result.is_err());

        let result = Config::load_with_overrides(&[("widgets.max_width", "16")]);
        assert!(result.unwrap_err().to_string().contains("grid_columns"));

        let result = Config::load_with_overrides(&[("widgets.default_width", "20")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_widget_service_config() {
        let config = Config::load_with_overrides(&[
            ("widgets.cache_ttl_secs", "60"),
            ("widgets.strict_dependencies", "true"),
        ])
        .unwrap();
        let service_config = config.widget_service_config().unwrap();
        assert_eq!(service_config.cache_ttl, chrono::Duration::seconds(60));
        assert!(service_config.strict_dependencies);
        assert_eq!(service_config.default_size, WidgetSize::new(4, 3));
        assert_eq!(service_config.size_constraints.max_width, 12);
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::load_with_overrides(&[
            ("server.host", "127.0.0.1"),
            ("server.port", "3000"),
        ])
        .expect("Failed to load config");

        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }
}
