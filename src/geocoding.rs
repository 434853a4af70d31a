//! Geocoding client for Nominatim integration
//!
//! Turns an address into coordinates and coordinates back into a display
//! address. Every lookup is a single attempt: a failure goes straight back to
//! the caller. Requests are spaced by a client-side rate limiter so the public
//! service's usage policy is respected without ever retrying.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cache::PersistentCache;
use crate::config::GeocodingConfig;
use crate::models::GeoPoint;
use crate::validator::Region;
use crate::{PollMapError, Result};

/// Forward and reverse geocoding
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve an address to a point inside the supported region
    async fn forward_geocode(&self, address: &str) -> Result<GeoPoint>;

    /// Resolve a point to a human-readable address
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<String>;
}

/// Rate limiter for geocoding requests
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum requests per minute
    max_requests_per_minute: u32,
    /// Request timestamps within the current minute
    request_times: Vec<Instant>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            max_requests_per_minute: max_requests_per_minute.max(1),
            request_times: Vec::new(),
        }
    }

    /// Check if a request is allowed and record it
    pub fn allow_request(&mut self) -> bool {
        self.cleanup_old_requests();

        if self.request_times.len() >= self.max_requests_per_minute as usize {
            false
        } else {
            self.request_times.push(Instant::now());
            true
        }
    }

    /// Get time until next request is allowed
    pub fn time_until_next_request(&mut self) -> Duration {
        self.cleanup_old_requests();

        if self.request_times.len() < self.max_requests_per_minute as usize {
            return Duration::ZERO;
        }
        match self.request_times.first() {
            Some(oldest) => Duration::from_secs(60).saturating_sub(oldest.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Remove requests older than 1 minute
    fn cleanup_old_requests(&mut self) {
        let window = Duration::from_secs(60);
        self.request_times.retain(|time| time.elapsed() < window);
    }
}

/// One entry of a Nominatim `/search` response
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
}

impl NominatimPlace {
    fn point(&self) -> Result<GeoPoint> {
        let lat = self.lat.parse::<f64>().map_err(|e| {
            PollMapError::network(format!("Invalid latitude '{}' from geocoder: {e}", self.lat))
        })?;
        let lng = self.lon.parse::<f64>().map_err(|e| {
            PollMapError::network(format!("Invalid longitude '{}' from geocoder: {e}", self.lon))
        })?;
        Ok(GeoPoint::new(lat, lng))
    }
}

/// Nominatim `/reverse` response; failures come back as `{"error": ...}`
#[derive(Debug, Deserialize)]
struct NominatimReverse {
    display_name: Option<String>,
    error: Option<String>,
}

/// Geocoding client for a Nominatim-compatible service
pub struct NominatimClient {
    /// HTTP client
    client: Client,
    base_url: String,
    country_codes: Option<String>,
    region: Region,
    region_pattern: Option<Regex>,
    rate_limiter: Mutex<RateLimiter>,
    cache: Option<(Arc<PersistentCache>, Duration)>,
}

impl NominatimClient {
    /// Create a new geocoding client
    pub fn new(config: &GeocodingConfig, region: Region) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PollMapError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            country_codes: config.country_codes.clone(),
            region_pattern: region.pattern(),
            region,
            rate_limiter: Mutex::new(RateLimiter::new(config.max_requests_per_minute)),
            cache: None,
        })
    }

    /// Serve repeated forward lookups from `cache` for `ttl`
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<PersistentCache>, ttl: Duration) -> Self {
        self.cache = Some((cache, ttl));
        self
    }

    fn cache_key(&self, address: &str) -> String {
        format!(
            "geocode:{}:{}",
            self.region.name.to_lowercase(),
            address.trim().to_lowercase()
        )
    }

    /// Wait for the rate limiter, then issue one GET
    async fn send(&self, url: &str) -> Result<Response> {
        loop {
            let wait = {
                let mut limiter = self.rate_limiter.lock().await;
                if limiter.allow_request() {
                    break;
                }
                limiter.time_until_next_request()
            };
            warn!("Geocoding rate limit reached, waiting {:.1}s", wait.as_secs_f64());
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }

        debug!("Geocoding request URL: {}", url);
        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        debug!(
            "Geocoding response {} in {:.3}s",
            status,
            start.elapsed().as_secs_f64()
        );

        if !status.is_success() {
            return Err(PollMapError::network(format!(
                "Geocoding request failed with status: {} - {}",
                status,
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }
        Ok(response)
    }

    async fn search(&self, address: &str) -> Result<GeoPoint> {
        let mut url = format!(
            "{}/search?q={}&format=jsonv2&limit=1&addressdetails=0",
            self.base_url,
            urlencoding::encode(address)
        );
        if let Some(codes) = &self.country_codes {
            url.push_str("&countrycodes=");
            url.push_str(&urlencoding::encode(codes));
        }

        let places: Vec<NominatimPlace> = self
            .send(&url)
            .await?
            .json()
            .await
            .map_err(|e| PollMapError::network(format!("Failed to parse geocoding response: {e}")))?;

        let Some(top) = places.into_iter().next() else {
            warn!("No geocoding results for '{}'", address);
            return Err(PollMapError::not_found(address));
        };

        let in_region = self
            .region_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(&top.display_name));
        if !in_region {
            warn!(
                "Top geocoding result '{}' is outside {}",
                top.display_name, self.region.name
            );
            return Err(PollMapError::RegionMismatch {
                region: self.region.name.clone(),
                found: top.display_name,
            });
        }

        let point = top.point()?;
        info!(
            "Geocoded '{}' to {} ({})",
            address,
            point.format_coordinates(),
            top.display_name
        );
        Ok(point)
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    #[instrument(skip(self))]
    async fn forward_geocode(&self, address: &str) -> Result<GeoPoint> {
        let key = self.cache_key(address);
        if let Some((cache, _)) = &self.cache {
            match cache.get::<GeoPoint>(&key).await {
                Ok(Some(point)) => {
                    debug!("Geocode cache hit for '{}'", address);
                    return Ok(point);
                }
                Ok(None) => {}
                Err(e) => warn!("Geocode cache read failed: {}", e),
            }
        }

        let point = self.search(address).await?;

        if let Some((cache, ttl)) = &self.cache {
            if let Err(e) = cache.put_jittered(&key, point, *ttl).await {
                warn!("Geocode cache write failed: {}", e);
            }
        }
        Ok(point)
    }

    #[instrument(skip(self), fields(lat = point.lat, lng = point.lng))]
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<String> {
        let url = format!(
            "{}/reverse?lat={}&lon={}&format=jsonv2",
            self.base_url, point.lat, point.lng
        );

        let reverse: NominatimReverse = self
            .send(&url)
            .await?
            .json()
            .await
            .map_err(|e| PollMapError::network(format!("Failed to parse reverse geocoding response: {e}")))?;

        match (reverse.display_name, reverse.error) {
            (Some(name), None) if !name.trim().is_empty() => Ok(name),
            (_, error) => {
                debug!("Reverse geocoding returned no address: {:?}", error);
                Err(PollMapError::not_found(point.format_coordinates()))
            }
        }
    }
}
