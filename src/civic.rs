//! Google Civic Information API client
//!
//! Used by the server behind `/api/polling-locations` and `/api/elections`.
//! Unlike the browser-side clients this one retries transient upstream
//! failures with exponential backoff.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::config::CivicConfig;
use crate::models::{Election, PollingSite, SearchResult, SiteType};
use crate::{PollMapError, Result};

const DEFAULT_POLLING_NAME: &str = "Polling Location";
const DEFAULT_EARLY_VOTING_NAME: &str = "Early Voting Site";
const DEFAULT_HOURS: &str = "Check local listings";

/// Voting-site and election source used by the server
#[async_trait]
pub trait CivicApi: Send + Sync {
    /// Polling locations and early voting sites for a registered address
    async fn voter_info(&self, address: &str) -> Result<SearchResult>;

    /// Elections known to the provider
    async fn elections(&self) -> Result<Vec<Election>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CivicAddress {
    location_name: Option<String>,
    line1: Option<String>,
    line2: Option<String>,
    line3: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
}

impl CivicAddress {
    /// Street lines, then "city, state, zip", all comma-joined
    fn format(&self) -> String {
        let lines = [&self.line1, &self.line2, &self.line3];
        let locality = [&self.city, &self.state, &self.zip];

        let mut parts: Vec<&str> = lines.into_iter().filter_map(non_blank).collect();
        let city_state_zip: Vec<&str> = locality.into_iter().filter_map(non_blank).collect();
        let joined = city_state_zip.join(", ");
        if !joined.is_empty() {
            parts.push(&joined);
        }
        parts.join(", ")
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CivicSite {
    #[serde(default)]
    address: CivicAddress,
    polling_hours: Option<String>,
    notes: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl CivicSite {
    fn into_site(self, site_type: SiteType) -> PollingSite {
        let default_name = match site_type {
            SiteType::Polling => DEFAULT_POLLING_NAME,
            SiteType::EarlyVoting => DEFAULT_EARLY_VOTING_NAME,
        };
        PollingSite {
            name: non_blank(&self.address.location_name)
                .unwrap_or(default_name)
                .to_string(),
            address: self.address.format(),
            hours: non_blank(&self.polling_hours)
                .unwrap_or(DEFAULT_HOURS)
                .to_string(),
            notes: self.notes,
            site_type,
            lat: self.latitude,
            lon: self.longitude,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CivicElection {
    id: String,
    #[serde(default)]
    name: String,
    election_day: Option<String>,
}

impl From<CivicElection> for Election {
    fn from(election: CivicElection) -> Self {
        let election_day = election
            .election_day
            .as_deref()
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok());
        Election {
            id: election.id,
            name: election.name,
            election_day,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoterInfoResponse {
    #[serde(default)]
    polling_locations: Vec<CivicSite>,
    #[serde(default)]
    early_vote_sites: Vec<CivicSite>,
    election: Option<CivicElection>,
}

impl From<VoterInfoResponse> for SearchResult {
    fn from(response: VoterInfoResponse) -> Self {
        let polling = response
            .polling_locations
            .into_iter()
            .map(|site| site.into_site(SiteType::Polling))
            .collect();
        let early = response
            .early_vote_sites
            .into_iter()
            .map(|site| site.into_site(SiteType::EarlyVoting))
            .collect();
        SearchResult {
            election: response.election.map(Election::from),
            ..SearchResult::found(polling, early)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ElectionsResponse {
    #[serde(default)]
    elections: Vec<CivicElection>,
}

/// HTTP client for the Civic Information API with transient-failure retry
pub struct CivicInfoClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: Option<String>,
    election_id: String,
}

impl CivicInfoClient {
    pub fn new(config: &CivicConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.into()))
            .user_agent(format!("PollMap/{}", crate::VERSION))
            .build()
            .map_err(|e| PollMapError::config(format!("Failed to create HTTP client: {e}")))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            election_id: config.election_id.clone(),
        })
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut query: Vec<String> = Vec::with_capacity(params.len() + 1);
        if let Some(key) = &self.api_key {
            query.push(format!("key={}", urlencoding::encode(key)));
        }
        query.extend(
            params
                .iter()
                .map(|(name, value)| format!("{name}={}", urlencoding::encode(value))),
        );
        if query.is_empty() {
            return format!("{}/{}", self.base_url, path);
        }
        format!("{}/{}?{}", self.base_url, path, query.join("&"))
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, url: &str) -> Result<T> {
        let start = Instant::now();
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!("Civic API request failed: {}", e);
            PollMapError::network(format!("Civic API request failed: {e}"))
        })?;

        let status = response.status();
        debug!(
            "Civic API response {} in {:.3}s",
            status,
            start.elapsed().as_secs_f64()
        );
        if !status.is_success() {
            return Err(PollMapError::network(format!(
                "Civic API request failed with status: {} - {}",
                status,
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PollMapError::network(format!("Failed to parse Civic API response: {e}")))
    }
}

#[async_trait]
impl CivicApi for CivicInfoClient {
    #[instrument(skip(self))]
    async fn voter_info(&self, address: &str) -> Result<SearchResult> {
        let url = self.url(
            "voterinfo",
            &[("address", address), ("electionId", &self.election_id)],
        );
        let response: VoterInfoResponse = self.get_json(&url).await?;
        let result = SearchResult::from(response);
        info!(
            "Civic API returned {} polling and {} early voting sites",
            result.polling_locations.len(),
            result.early_vote_sites.len()
        );
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn elections(&self) -> Result<Vec<Election>> {
        let url = self.url("elections", &[]);
        let response: ElectionsResponse = self.get_json(&url).await?;
        Ok(response.elections.into_iter().map(Election::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn address(json: &str) -> CivicAddress {
        serde_json::from_str(json).unwrap()
    }

    #[rstest]
    #[case(
        r#"{"line1": "100 Larkin St", "city": "San Francisco", "state": "CA", "zip": "94102"}"#,
        "100 Larkin St, San Francisco, CA, 94102"
    )]
    #[case(
        r#"{"line1": "1 Main St", "line2": "Room 4", "city": "Fresno"}"#,
        "1 Main St, Room 4, Fresno"
    )]
    #[case(r#"{"city": "Davis", "state": "CA"}"#, "Davis, CA")]
    #[case(r#"{}"#, "")]
    fn test_format_address(#[case] json: &str, #[case] expected: &str) {
        assert_eq!(address(json).format(), expected);
    }

    #[test]
    fn test_voter_info_mapping() {
        let json = r#"{
            "election": {"id": "2000", "name": "VIP Test Election", "electionDay": "2025-06-06"},
            "pollingLocations": [{
                "address": {"locationName": "CITY HALL", "line1": "1 Dr Carlton B Goodlett Pl",
                            "city": "San Francisco", "state": "CA", "zip": "94102"},
                "pollingHours": "7am-8pm",
                "latitude": 37.7793,
                "longitude": -122.4193
            }],
            "earlyVoteSites": [{
                "address": {"line1": "100 Larkin St", "city": "San Francisco", "state": "CA"},
                "notes": "Weekdays only"
            }]
        }"#;

        let response: VoterInfoResponse = serde_json::from_str(json).unwrap();
        let result = SearchResult::from(response);

        assert!(result.success);
        let hall = &result.polling_locations[0];
        assert_eq!(hall.name, "CITY HALL");
        assert_eq!(hall.hours, "7am-8pm");
        assert!(hall.is_mappable());

        let library = &result.early_vote_sites[0];
        assert_eq!(library.name, DEFAULT_EARLY_VOTING_NAME);
        assert_eq!(library.hours, DEFAULT_HOURS);
        assert_eq!(library.site_type, SiteType::EarlyVoting);
        assert_eq!(library.notes(), Some("Weekdays only"));

        let election = result.election.unwrap();
        assert_eq!(election.id, "2000");
        assert_eq!(election.election_day, NaiveDate::from_ymd_opt(2025, 6, 6));
    }

    #[test]
    fn test_empty_voter_info_is_success() {
        let response: VoterInfoResponse = serde_json::from_str("{}").unwrap();
        let result = SearchResult::from(response);
        assert!(result.success);
        assert!(result.is_empty());
        assert!(result.election.is_none());
    }

    #[test]
    fn test_url_includes_key_and_encodes_params() {
        let client = CivicInfoClient::new(&CivicConfig {
            api_key: Some("k3y".to_string()),
            ..CivicConfig::default()
        })
        .unwrap();
        let url = client.url("voterinfo", &[("address", "1 Main St, Davis, CA")]);
        assert_eq!(
            url,
            "https://www.googleapis.com/civicinfo/v2/voterinfo?key=k3y&address=1%20Main%20St%2C%20Davis%2C%20CA"
        );

        let keyless = CivicInfoClient::new(&CivicConfig::default()).unwrap();
        assert!(keyless.url("elections", &[]).ends_with("/elections"));
    }

    #[test]
    fn test_election_with_bad_date() {
        let election: Election = CivicElection {
            id: "9".to_string(),
            name: "Special".to_string(),
            election_day: Some("soon".to_string()),
        }
        .into();
        assert!(election.election_day.is_none());
    }
}
