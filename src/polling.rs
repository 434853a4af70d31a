//! Client for the polling-location backend

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use crate::config::BackendConfig;
use crate::models::{GeoPoint, SearchResult};
use crate::{PollMapError, Result};

/// What to look up sites for
#[derive(Debug, Clone, PartialEq)]
pub enum SiteQuery {
    Address(String),
    Coordinates(GeoPoint),
}

impl SiteQuery {
    /// URL query string for `/api/polling-locations`
    #[must_use]
    pub fn to_query_string(&self) -> String {
        match self {
            SiteQuery::Address(address) => format!("address={}", urlencoding::encode(address)),
            SiteQuery::Coordinates(point) => format!("lat={}&lng={}", point.lat, point.lng),
        }
    }
}

/// Source of polling and early-voting sites
#[async_trait]
pub trait PollingApi: Send + Sync {
    /// Fetch sites; `success: false` answers are returned, not raised
    async fn lookup(&self, query: &SiteQuery) -> Result<SearchResult>;
}

/// HTTP client for `GET /api/polling-locations`
pub struct PollingLocationClient {
    client: Client,
    base_url: String,
}

impl PollingLocationClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .user_agent(format!("PollMap/{}", crate::VERSION))
            .build()
            .map_err(|e| PollMapError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, query: &SiteQuery) -> String {
        format!(
            "{}/api/polling-locations?{}",
            self.base_url,
            query.to_query_string()
        )
    }
}

#[async_trait]
impl PollingApi for PollingLocationClient {
    #[instrument(skip(self))]
    async fn lookup(&self, query: &SiteQuery) -> Result<SearchResult> {
        let url = self.endpoint(query);
        debug!("Polling locations request URL: {}", url);
        let start = Instant::now();

        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!("Polling location request failed: {}", e);
                PollMapError::network(format!("Request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Polling location backend answered HTTP {}", status);
            return Err(PollMapError::network(format!("HTTP error! status: {status}")));
        }

        let result: SearchResult = response
            .json()
            .await
            .map_err(|e| PollMapError::network(format!("Failed to parse polling locations: {e}")))?;

        info!(
            "Received {} polling and {} early voting sites in {:.3}s (success: {})",
            result.polling_locations.len(),
            result.early_vote_sites.len(),
            start.elapsed().as_secs_f64(),
            result.success
        );
        Ok(result)
    }
}
