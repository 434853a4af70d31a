//! Data models for the PollMap application
//!
//! This module contains the core domain models organized by concern:
//! - Location: Geographic points and bounding boxes
//! - Site: Polling sites and the backend search result contract

pub mod location;
pub mod site;

// Re-export all public types for convenient access
pub use location::{GeoBounds, GeoPoint};
pub use site::{Election, PollingSite, SearchResult, SiteType};
