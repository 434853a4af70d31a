//! Error types and handling for the `PollMap` application

use thiserror::Error;

use crate::location::LocationError;
use crate::validator::ValidationError;

/// Banner text for transport failures against the polling backend
pub const SEARCH_FAILED_MESSAGE: &str = "An error occurred while searching. Please try again.";

/// Banner text for a valid address that has no sites
pub const NO_RESULTS_MESSAGE: &str = "No polling locations found for this address.";

/// Banner text when the backend reports failure without its own message
pub const BACKEND_FALLBACK_MESSAGE: &str = "Unable to find polling locations for this address.";

/// Same, for a search started from the device position
pub const LOCATION_FALLBACK_MESSAGE: &str =
    "Unable to find polling locations for your current location.";

/// Main error type for the `PollMap` application
#[derive(Error, Debug)]
pub enum PollMapError {
    /// Address rejected before any network call
    #[error("Invalid address: {0}")]
    Validation(#[from] ValidationError),

    /// Geocoding provider returned no match
    #[error("Location not found: {query}")]
    NotFound { query: String },

    /// Top geocoding match lies outside the supported region
    #[error("Location outside {region}: {found}")]
    RegionMismatch { region: String, found: String },

    /// Transport failure or non-success HTTP status
    #[error("Network error: {message}")]
    Network { message: String },

    /// Backend answered successfully but with no sites at all
    #[error("No polling locations found")]
    NoResults,

    /// Backend answered with `success: false`
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Device location could not be obtained
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    /// Map operation attempted before `init`
    #[error("Map has not been initialized")]
    MapNotInitialized,

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Cache operation errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl PollMapError {
    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(query: S) -> Self {
        Self::NotFound {
            query: query.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Get the message shown in the error banner
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            PollMapError::Validation(reason) => reason.user_message().to_string(),
            PollMapError::NotFound { .. } => "Unable to find the specified address.".to_string(),
            PollMapError::RegionMismatch { region, .. } => {
                format!("Please enter a {region} address for accurate polling information.")
            }
            PollMapError::Network { .. } => SEARCH_FAILED_MESSAGE.to_string(),
            PollMapError::NoResults => NO_RESULTS_MESSAGE.to_string(),
            PollMapError::Backend { message } => message.clone(),
            PollMapError::Location(err) => err.to_string(),
            PollMapError::MapNotInitialized => {
                "The map is not ready yet. Please reload the page.".to_string()
            }
            PollMapError::Config { .. } => {
                "Configuration error. Please check your config file and API keys.".to_string()
            }
            PollMapError::Cache { .. } => {
                "Cache operation failed. You may need to clear your cache.".to_string()
            }
            PollMapError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for PollMapError {
    fn from(err: reqwest::Error) -> Self {
        PollMapError::network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = PollMapError::config("missing API key");
        assert!(matches!(config_err, PollMapError::Config { .. }));

        let net_err = PollMapError::network("connection refused");
        assert!(matches!(net_err, PollMapError::Network { .. }));

        let not_found = PollMapError::not_found("1 Nowhere Rd");
        assert!(not_found.to_string().contains("1 Nowhere Rd"));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            PollMapError::network("timeout").user_message(),
            SEARCH_FAILED_MESSAGE
        );
        assert_eq!(PollMapError::NoResults.user_message(), NO_RESULTS_MESSAGE);

        let mismatch = PollMapError::RegionMismatch {
            region: "California".to_string(),
            found: "Portland, Oregon".to_string(),
        };
        assert!(mismatch.user_message().contains("California address"));

        let backend = PollMapError::Backend {
            message: "Election not found".to_string(),
        };
        assert_eq!(backend.user_message(), "Election not found");
    }

    #[test]
    fn test_validation_error_conversion() {
        let err: PollMapError = ValidationError::MissingStreetNumber.into();
        assert!(matches!(err, PollMapError::Validation(_)));
        assert!(err.user_message().contains("street number"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PollMapError = io_err.into();
        assert!(matches!(err, PollMapError::Io { .. }));
    }
}
