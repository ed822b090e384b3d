//! Common validation utilities.

use chrono::{NaiveDate, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use semver::Version;
use validator::{ValidateEmail, ValidateUrl, ValidationError};

/// Maximum length of a widget identifier.
pub const MAX_WIDGET_ID_LENGTH: usize = 64;

lazy_static! {
    static ref WIDGET_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").unwrap();
    static ref PARTIAL_VERSION_RE: Regex =
        Regex::new(r"^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?((?:[-+][0-9A-Za-z.\-+]+)?)$").unwrap();
    static ref HEX_COLOR_RE: Regex =
        Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6}|[0-9a-fA-F]{8})$").unwrap();
}

fn error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates a widget identifier: non-empty, at most 64 characters, starting
/// with an alphanumeric character and containing only `[A-Za-z0-9_.-]`.
pub fn validate_widget_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_WIDGET_ID_LENGTH {
        return Err(error(
            "widget_id_length",
            format!(
                "Widget id must be between 1 and {} characters",
                MAX_WIDGET_ID_LENGTH
            ),
        ));
    }
    if !WIDGET_ID_RE.is_match(id) {
        return Err(error(
            "widget_id_format",
            format!("Widget id '{}' contains invalid characters", id),
        ));
    }
    Ok(())
}

/// Parses a semantic version, padding partial versions (`1`, `1.2`) with zeros.
///
/// A leading `v` is accepted. Pre-release and build suffixes are kept.
pub fn parse_version(input: &str) -> Result<Version, ValidationError> {
    let trimmed = input.trim();
    let caps = PARTIAL_VERSION_RE.captures(trimmed).ok_or_else(|| {
        error(
            "version_format",
            format!("'{}' is not a valid semantic version", input),
        )
    })?;

    let major = &caps[1];
    let minor = caps.get(2).map_or("0", |m| m.as_str());
    let patch = caps.get(3).map_or("0", |m| m.as_str());
    let suffix = caps.get(4).map_or("", |m| m.as_str());

    Version::parse(&format!("{}.{}.{}{}", major, minor, patch, suffix)).map_err(|e| {
        error(
            "version_format",
            format!("'{}' is not a valid semantic version: {}", input, e),
        )
    })
}

/// Parses a time of day in `HH:MM` or `HH:MM:SS` form.
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime, ValidationError> {
    let trimmed = input.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| {
            error(
                "time_format",
                format!("'{}' is not a valid time (expected HH:MM)", input),
            )
        })
}

/// Validates that a grid dimension lies within `min..=max`.
pub fn validate_dimension(
    name: &str,
    value: u32,
    min: u32,
    max: u32,
) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(error(
            "dimension_range",
            format!("{} must be between {} and {} (got {})", name, min, max, value),
        ))
    }
}

/// Validates an email address.
pub fn validate_email_value(value: &str) -> Result<(), ValidationError> {
    if value.to_string().validate_email() {
        Ok(())
    } else {
        Err(error("email", "Must be a valid email address".to_string()))
    }
}

/// Validates an absolute URL.
pub fn validate_url_value(value: &str) -> Result<(), ValidationError> {
    if value.to_string().validate_url() {
        Ok(())
    } else {
        Err(error("url", "Must be a valid URL".to_string()))
    }
}

/// Validates a `#rgb`, `#rrggbb` or `#rrggbbaa` color.
pub fn validate_hex_color(value: &str) -> Result<(), ValidationError> {
    if HEX_COLOR_RE.is_match(value) {
        Ok(())
    } else {
        Err(error(
            "color",
            "Must be a hex color such as #1f2937".to_string(),
        ))
    }
}

/// Validates an ISO-8601 calendar date (`YYYY-MM-DD`).
pub fn validate_iso_date(value: &str) -> Result<(), ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| error("date", "Must be a date in YYYY-MM-DD format".to_string()))
}

/// Returns the human-readable message of a validation error.
pub fn error_message(err: &ValidationError) -> String {
    err.message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_widget_id() {
        assert!(validate_widget_id("data_formatter").is_ok());
        assert!(validate_widget_id("theme-dark").is_ok());
        assert!(validate_widget_id("charts.basic").is_ok());
        assert!(validate_widget_id("").is_err());
        assert!(validate_widget_id("_hidden").is_err());
        assert!(validate_widget_id("has space").is_err());
        assert!(validate_widget_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_widget_id_error_message() {
        let err = validate_widget_id("bad id").unwrap_err();
        assert_eq!(
            error_message(&err),
            "Widget id 'bad id' contains invalid characters"
        );
    }

    #[test]
    fn test_parse_version_full() {
        assert_eq!(parse_version("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_version("v2.0.1").unwrap(), Version::new(2, 0, 1));
    }

    #[test]
    fn test_parse_version_partial() {
        assert_eq!(parse_version("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(parse_version("1.4").unwrap(), Version::new(1, 4, 0));
    }

    #[test]
    fn test_parse_version_prerelease() {
        let version = parse_version("2.0.0-beta.1").unwrap();
        assert_eq!(version.major, 2);
        assert!(!version.pre.is_empty());
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(parse_version("").is_err());
        assert!(parse_version("latest").is_err());
        assert!(parse_version("1.2.3.4").is_err());
        assert!(parse_version(">=1.0.0").is_err());
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(
            parse_time_of_day("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time_of_day("16:00:15").unwrap(),
            NaiveTime::from_hms_opt(16, 0, 15).unwrap()
        );
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("noon").is_err());
    }

    #[test]
    fn test_validate_dimension() {
        assert!(validate_dimension("width", 4, 1, 12).is_ok());
        assert!(validate_dimension("width", 1, 1, 12).is_ok());
        assert!(validate_dimension("width", 12, 1, 12).is_ok());
        let err = validate_dimension("width", 13, 1, 12).unwrap_err();
        assert_eq!(error_message(&err), "width must be between 1 and 12 (got 13)");
    }

    #[test]
    fn test_validate_email_value() {
        assert!(validate_email_value("ops@example.com").is_ok());
        assert!(validate_email_value("not-an-email").is_err());
    }

    #[test]
    fn test_validate_url_value() {
        assert!(validate_url_value("https://example.com/feed").is_ok());
        assert!(validate_url_value("example").is_err());
    }

    #[test]
    fn test_validate_hex_color() {
        assert!(validate_hex_color("#fff").is_ok());
        assert!(validate_hex_color("#1f2937").is_ok());
        assert!(validate_hex_color("#1f2937cc").is_ok());
        assert!(validate_hex_color("1f2937").is_err());
        assert!(validate_hex_color("#12345").is_err());
    }

    #[test]
    fn test_validate_iso_date() {
        assert!(validate_iso_date("2024-02-29").is_ok());
        assert!(validate_iso_date("2023-02-29").is_err());
        assert!(validate_iso_date("29/02/2024").is_err());
    }
}
