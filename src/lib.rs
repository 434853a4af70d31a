//! `PollMap` - find polling places and early voting sites for an address
//!
//! An address is validated, geocoded and sent to the polling-location backend;
//! the sites that come back are placed on a map and listed in a results panel.
//! The same crate ships that backend, which answers from the Google Civic
//! Information API.

pub mod cache;
pub mod civic;
pub mod config;
pub mod controller;
pub mod error;
pub mod geocoding;
mod html;
pub mod location;
pub mod map;
pub mod models;
pub mod polling;
pub mod results;
pub mod server;
pub mod telemetry;
pub mod validator;

// Re-export core types for public API
pub use cache::PersistentCache;
pub use civic::{CivicApi, CivicInfoClient};
pub use config::PollMapConfig;
pub use controller::{SearchController, SearchState};
pub use error::PollMapError;
pub use geocoding::{Geocoder, NominatimClient};
pub use location::{CachedLocator, DeviceLocator, FixedLocator, LocationError, PositionOptions};
pub use map::{GeoJsonCanvas, MapView, MapWidget};
pub use models::{Election, GeoBounds, GeoPoint, PollingSite, SearchResult, SiteType};
pub use polling::{PollingApi, PollingLocationClient, SiteQuery};
pub use results::ResultsPanel;
pub use validator::{AddressValidator, Region, ValidationError, ValidationMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, PollMapError>;
