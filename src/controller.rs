//! Search workflow
//!
//! [`SearchController`] drives one search at a time through
//! validation, geocoding and the site lookup, then hands the result to the
//! map and the results panel. Every attempt ends back in [`SearchState::Idle`]
//! with the loading indicator hidden, whatever happened on the way.

use std::fmt;

use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{BACKEND_FALLBACK_MESSAGE, LOCATION_FALLBACK_MESSAGE};
use crate::geocoding::Geocoder;
use crate::location::{DeviceLocator, PositionOptions, locate_with_timeout};
use crate::map::{MapView, MapWidget};
use crate::models::{GeoPoint, SearchResult};
use crate::polling::{PollingApi, SiteQuery};
use crate::results::ResultsPanel;
use crate::validator::AddressValidator;
use crate::{PollMapError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Idle,
    Validating,
    Geocoding,
    Locating,
    FetchingSites,
    Displaying,
    Failed,
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchState::Idle => "idle",
            SearchState::Validating => "validating",
            SearchState::Geocoding => "geocoding",
            SearchState::Locating => "locating",
            SearchState::FetchingSites => "fetching_sites",
            SearchState::Displaying => "displaying",
            SearchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Orchestrates address and current-location searches
pub struct SearchController<G, P, L, W: MapWidget> {
    validator: AddressValidator,
    geocoder: G,
    polling: P,
    locator: L,
    position_options: PositionOptions,
    reverse_lookup: bool,
    map: MapView<W>,
    panel: ResultsPanel,
    state: SearchState,
    trail: Vec<SearchState>,
    generation: u64,
    resolved_address: Option<String>,
}

impl<G, P, L, W> SearchController<G, P, L, W>
where
    G: Geocoder,
    P: PollingApi,
    L: DeviceLocator,
    W: MapWidget,
{
    pub fn new(
        validator: AddressValidator,
        geocoder: G,
        polling: P,
        locator: L,
        map: MapView<W>,
    ) -> Self {
        Self {
            validator,
            geocoder,
            polling,
            locator,
            position_options: PositionOptions::default(),
            reverse_lookup: true,
            map,
            panel: ResultsPanel::new(),
            state: SearchState::Idle,
            trail: Vec::new(),
            generation: 0,
            resolved_address: None,
        }
    }

    #[must_use]
    pub fn with_position_options(mut self, options: PositionOptions) -> Self {
        self.position_options = options;
        self
    }

    /// Whether the location path reverse-geocodes the fix for display
    #[must_use]
    pub fn with_reverse_lookup(mut self, enabled: bool) -> Self {
        self.reverse_lookup = enabled;
        self
    }

    #[must_use]
    pub fn state(&self) -> SearchState {
        self.state
    }

    /// States visited during the last attempt, ending in `Idle`
    #[must_use]
    pub fn trail(&self) -> &[SearchState] {
        &self.trail
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn map(&self) -> &MapView<W> {
        &self.map
    }

    #[must_use]
    pub fn panel(&self) -> &ResultsPanel {
        &self.panel
    }

    /// Address resolved for the last current-location search
    #[must_use]
    pub fn resolved_address(&self) -> Option<&str> {
        self.resolved_address.as_deref()
    }

    /// Search for sites near a typed address.
    /// Returns the number of site markers placed; errors are also shown in the panel.
    pub async fn submit(&mut self, address: &str) -> Result<usize> {
        self.begin(SearchState::Validating);
        let span = info_span!("search", generation = self.generation, path = "address");
        let outcome = self.run_address(address).instrument(span).await;
        self.finish(outcome)
    }

    /// Search for sites around the device's current position
    pub async fn use_current_location(&mut self) -> Result<usize> {
        self.begin(SearchState::Locating);
        let span = info_span!("search", generation = self.generation, path = "location");
        let outcome = self.run_location().instrument(span).await;
        self.finish(outcome)
    }

    async fn run_address(&mut self, address: &str) -> Result<usize> {
        self.validator.validate(address)?;
        let address = address.trim();

        self.transition(SearchState::Geocoding);
        let point = self.geocoder.forward_geocode(address).await?;

        self.transition(SearchState::FetchingSites);
        let result = self
            .polling
            .lookup(&SiteQuery::Address(address.to_string()))
            .await?;
        self.display(point, &result, BACKEND_FALLBACK_MESSAGE)
    }

    async fn run_location(&mut self) -> Result<usize> {
        let point = locate_with_timeout(&self.locator, &self.position_options).await?;
        info!("Device location: {}", point.format_coordinates());

        if self.reverse_lookup {
            match self.geocoder.reverse_geocode(point).await {
                Ok(address) => {
                    debug!("Current location resolves to '{}'", address);
                    self.resolved_address = Some(address);
                }
                Err(e) => warn!("Reverse geocoding failed, continuing without address: {}", e),
            }
        }

        self.transition(SearchState::FetchingSites);
        let result = self.polling.lookup(&SiteQuery::Coordinates(point)).await?;
        self.display(point, &result, LOCATION_FALLBACK_MESSAGE)
    }

    /// `fallback` is shown when the backend fails without a message of its own
    fn display(
        &mut self,
        point: GeoPoint,
        result: &SearchResult,
        fallback: &'static str,
    ) -> Result<usize> {
        if !result.success {
            let message = result
                .error
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(fallback);
            return Err(PollMapError::Backend {
                message: message.to_string(),
            });
        }
        if result.is_empty() {
            return Err(PollMapError::NoResults);
        }

        self.transition(SearchState::Displaying);
        self.map.clear();
        self.map.set_user_marker(point)?;
        let placed = self.map.set_site_markers(&result.all_sites())?;
        self.map.fit_to_markers()?;

        self.panel
            .render_sites(&result.polling_locations, &result.early_vote_sites, Some(point));
        self.panel.confirm_search();
        self.panel.clear_error();

        info!(
            "Displaying {} polling and {} early voting sites ({} on map)",
            result.polling_locations.len(),
            result.early_vote_sites.len(),
            placed
        );
        Ok(placed)
    }

    fn begin(&mut self, first: SearchState) {
        self.generation += 1;
        self.trail.clear();
        self.resolved_address = None;
        self.panel.show_loading();
        self.transition(first);
    }

    fn finish(&mut self, outcome: Result<usize>) -> Result<usize> {
        self.panel.hide_loading();
        if let Err(e) = &outcome {
            warn!(generation = self.generation, "Search failed: {}", e);
            self.transition(SearchState::Failed);
            self.panel.show_error(e.user_message());
        }
        self.transition(SearchState::Idle);
        outcome
    }

    fn transition(&mut self, next: SearchState) {
        debug!(generation = self.generation, "{} -> {}", self.state, next);
        self.state = next;
        self.trail.push(next);
    }
}
