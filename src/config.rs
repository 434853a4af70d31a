//! `PollMap` settings
//!
//! Read from `config.toml` in the user config directory (or an explicit path),
//! overridden by `POLLMAP_*` environment variables, then defaulted and checked.

use crate::PollMapError;
use crate::location::PositionOptions;
use crate::models::GeoPoint;
use crate::validator::{AddressValidator, Region, ValidationMode};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure for the `PollMap` application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollMapConfig {
    /// Supported region
    pub region: Region,
    /// Address validation settings
    pub validation: ValidationConfig,
    /// Geocoding provider settings
    pub geocoding: GeocodingConfig,
    /// Polling-location backend as seen by the search client
    pub backend: BackendConfig,
    /// Google Civic Information API settings used by the server
    pub civic: CivicConfig,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Map defaults
    pub map: MapConfig,
    /// Device location settings
    pub location: LocationConfig,
    /// Cache configuration
    pub cache: CacheConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// `strict` or `lenient`
    pub mode: ValidationMode,
}

/// Geocoding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Base URL of a Nominatim-compatible service
    pub base_url: String,
    /// User-Agent sent with every request, required by the public Nominatim policy
    pub user_agent: String,
    /// Request timeout in seconds
    pub timeout_seconds: u32,
    /// Client-side request budget
    pub max_requests_per_minute: u32,
    /// Optional ISO country filter, e.g. "us"
    pub country_codes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL hosting `/api/polling-locations`
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u32,
}

/// Google Civic Information API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CivicConfig {
    /// API key, required to serve polling locations
    pub api_key: Option<String>,
    pub base_url: String,
    /// Election to query; "2000" is the API's test election
    pub election_id: String,
    /// Request timeout in seconds
    pub timeout_seconds: u32,
    /// Retries for transient upstream failures
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory with the static front-end
    pub static_dir: String,
    /// Per-request timeout in seconds
    pub request_timeout_seconds: u32,
    /// PEM certificate and key; TLS is used when both are set
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Initial map center
    pub center: GeoPoint,
    /// Initial zoom
    pub zoom: u8,
    /// Zoom used when only the user marker is shown
    pub user_zoom: u8,
    /// Highest zoom a fit-to-markers may reach
    pub max_fit_zoom: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub high_accuracy: bool,
    /// Bounded wait for a position fix
    pub timeout_seconds: u32,
    /// Age up to which a previous fix is reused
    pub maximum_age_seconds: u32,
    /// Reverse-geocode the fix to show an address to the user
    pub show_address: bool,
}

/// Cache configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Cache TTL in hours
    pub ttl_hours: u32,
    /// Cache directory location
    pub location: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (pretty or json)
    pub format: String,
    /// OTLP/HTTP endpoint for trace export
    pub otlp_endpoint: Option<String>,
}

// Default value functions
fn default_geocoding_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    format!("PollMap/{}", crate::VERSION)
}

fn default_timeout() -> u32 {
    30
}

fn default_max_requests_per_minute() -> u32 {
    60
}

fn default_backend_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_civic_base_url() -> String {
    "https://www.googleapis.com/civicinfo/v2".to_string()
}

fn default_election_id() -> String {
    "2000".to_string()
}

fn default_civic_max_retries() -> u32 {
    2
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_map_center() -> GeoPoint {
    GeoPoint::new(36.7783, -119.4179)
}

fn default_cache_ttl() -> u32 {
    24
}

fn default_cache_location() -> String {
    dirs::cache_dir()
        .map(|dir| dir.join("pollmap").to_string_lossy().into_owned())
        .unwrap_or_else(|| ".cache/pollmap".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Strict,
        }
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoding_base_url(),
            user_agent: default_user_agent(),
            timeout_seconds: default_timeout(),
            max_requests_per_minute: default_max_requests_per_minute(),
            country_codes: Some("us".to_string()),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_base_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Default for CivicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_civic_base_url(),
            election_id: default_election_id(),
            timeout_seconds: default_timeout(),
            max_retries: default_civic_max_retries(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            request_timeout_seconds: default_timeout(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: default_map_center(),
            zoom: 6,
            user_zoom: 12,
            max_fit_zoom: 15,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_seconds: 10,
            maximum_age_seconds: 300,
            show_address: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: default_cache_ttl(),
            location: default_cache_location(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            otlp_endpoint: None,
        }
    }
}

impl LocationConfig {
    /// Position request options derived from this section
    #[must_use]
    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.high_accuracy,
            timeout: Duration::from_secs(self.timeout_seconds.into()),
            maximum_age: Duration::from_secs(self.maximum_age_seconds.into()),
        }
    }
}

impl PollMapConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(None)
    }

    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from file if path is provided or use default location
        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment overrides, e.g. POLLMAP_CIVIC__API_KEY
        builder = builder.add_source(
            Environment::with_prefix("POLLMAP")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("region.tokens")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let mut config: PollMapConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        // Apply defaults for missing values
        config.apply_defaults();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pollmap").join("config.toml"))
    }

    /// Validator configured for the region and mode
    #[must_use]
    pub fn address_validator(&self) -> AddressValidator {
        AddressValidator::new(self.region.clone(), self.validation.mode)
    }

    /// Apply default values to fields left empty or zero
    pub fn apply_defaults(&mut self) {
        if self.region.tokens.is_empty() {
            self.region = Region::default();
        }
        if self.geocoding.base_url.is_empty() {
            self.geocoding.base_url = default_geocoding_base_url();
        }
        if self.geocoding.user_agent.is_empty() {
            self.geocoding.user_agent = default_user_agent();
        }
        if self.geocoding.timeout_seconds == 0 {
            self.geocoding.timeout_seconds = default_timeout();
        }
        if self.geocoding.max_requests_per_minute == 0 {
            self.geocoding.max_requests_per_minute = default_max_requests_per_minute();
        }
        if self.backend.base_url.is_empty() {
            self.backend.base_url = default_backend_base_url();
        }
        if self.backend.timeout_seconds == 0 {
            self.backend.timeout_seconds = default_timeout();
        }
        if self.civic.base_url.is_empty() {
            self.civic.base_url = default_civic_base_url();
        }
        if self.civic.election_id.is_empty() {
            self.civic.election_id = default_election_id();
        }
        if self.civic.timeout_seconds == 0 {
            self.civic.timeout_seconds = default_timeout();
        }
        if self.server.port == 0 {
            self.server.port = default_port();
        }
        if self.server.request_timeout_seconds == 0 {
            self.server.request_timeout_seconds = default_timeout();
        }
        if self.cache.ttl_hours == 0 {
            self.cache.ttl_hours = default_cache_ttl();
        }
        if self.cache.location.is_empty() {
            self.cache.location = default_cache_location();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_api_keys()?;
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    /// Validate API keys and credentials
    pub fn validate_api_keys(&self) -> Result<()> {
        // The key is optional so the search client can run without the server part
        if let Some(api_key) = &self.civic.api_key {
            if api_key.is_empty() {
                return Err(PollMapError::config(
                    "Civic API key cannot be empty if provided. Either remove it or provide a valid key.",
                )
                .into());
            }

            if api_key.len() < 8 {
                return Err(PollMapError::config(
                    "Civic API key appears to be invalid (too short). Please check your API key.",
                )
                .into());
            }
        }

        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        for (name, seconds) in [
            ("Geocoding", self.geocoding.timeout_seconds),
            ("Backend", self.backend.timeout_seconds),
            ("Civic API", self.civic.timeout_seconds),
            ("Server request", self.server.request_timeout_seconds),
        ] {
            if seconds > 300 {
                return Err(
                    PollMapError::config(format!("{name} timeout cannot exceed 300 seconds")).into(),
                );
            }
        }

        if self.civic.max_retries > 10 {
            return Err(PollMapError::config("Civic API max retries cannot exceed 10").into());
        }

        if self.location.timeout_seconds == 0 || self.location.timeout_seconds > 120 {
            return Err(PollMapError::config(
                "Location timeout must be between 1 and 120 seconds",
            )
            .into());
        }

        if self.cache.ttl_hours > 168 {
            return Err(PollMapError::config("Cache TTL cannot exceed 168 hours (1 week)").into());
        }

        let zooms = [self.map.zoom, self.map.user_zoom, self.map.max_fit_zoom];
        if zooms.iter().any(|z| *z > 19) {
            return Err(PollMapError::config("Map zoom levels cannot exceed 19").into());
        }

        if GeoPoint::checked(self.map.center.lat, self.map.center.lng).is_err() {
            return Err(PollMapError::config("Map center has invalid coordinates").into());
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(PollMapError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(PollMapError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        for (name, url) in [
            ("Geocoding", &self.geocoding.base_url),
            ("Backend", &self.backend.base_url),
            ("Civic API", &self.civic.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(PollMapError::config(format!(
                    "{name} base URL must be a valid HTTP or HTTPS URL"
                ))
                .into());
            }
        }

        if self.region.name.trim().is_empty() {
            return Err(PollMapError::config("Region name cannot be empty").into());
        }

        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(PollMapError::config(
                "Both server.tls_cert and server.tls_key must be set to enable TLS",
            )
            .into());
        }

        Ok(())
    }

    /// Create configuration directory if it doesn't exist
    pub fn ensure_config_dir() -> Result<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let pollmap_config_dir = config_dir.join("pollmap");
            std::fs::create_dir_all(&pollmap_config_dir).with_context(|| {
                format!(
                    "Failed to create config directory: {}",
                    pollmap_config_dir.display()
                )
            })?;
            Ok(pollmap_config_dir)
        } else {
            Err(PollMapError::config("Unable to determine config directory").into())
        }
    }
}
