//! Polling site model and the backend search contract

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Kind of voting site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    /// Election Day polling location
    #[default]
    Polling,
    /// Early voting site
    EarlyVoting,
}

/// A physical place where voters may cast ballots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingSite {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub hours: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "type", default)]
    pub site_type: SiteType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl PollingSite {
    /// Coordinates, when the backend supplied both
    #[must_use]
    pub fn position(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }

    /// Notes with blank strings treated as absent
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    /// Whether the site carries enough data to be placed on a map
    #[must_use]
    pub fn is_mappable(&self) -> bool {
        self.position().is_some() && !self.address.trim().is_empty()
    }
}

/// Election metadata echoed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election_day: Option<NaiveDate>,
}

/// Response body of `GET /api/polling-locations`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub success: bool,
    #[serde(default)]
    pub polling_locations: Vec<PollingSite>,
    #[serde(default)]
    pub early_vote_sites: Vec<PollingSite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election: Option<Election>,
}

impl SearchResult {
    /// Successful result carrying the given site lists
    #[must_use]
    pub fn found(polling_locations: Vec<PollingSite>, early_vote_sites: Vec<PollingSite>) -> Self {
        Self {
            success: true,
            polling_locations,
            early_vote_sites,
            ..Default::default()
        }
    }

    /// Business-level failure with a message for the user
    #[must_use]
    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polling_locations.is_empty() && self.early_vote_sites.is_empty()
    }

    /// All sites, polling locations first, with `site_type` normalized per list
    #[must_use]
    pub fn all_sites(&self) -> Vec<PollingSite> {
        let polling = self.polling_locations.iter().cloned().map(|mut site| {
            site.site_type = SiteType::Polling;
            site
        });
        let early = self.early_vote_sites.iter().cloned().map(|mut site| {
            site.site_type = SiteType::EarlyVoting;
            site
        });
        polling.chain(early).collect()
    }
}
