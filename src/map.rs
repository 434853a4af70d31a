//! Map view
//!
//! [`MapView`] owns the map widget, the user marker and the site markers. Each
//! search clears and rebuilds the whole marker set; markers are never edited
//! in place, so nothing from an earlier search can survive into a later one.
//!
//! The widget itself sits behind [`MapWidget`]. [`GeoJsonCanvas`] is the
//! bundled implementation: it keeps markers and viewport in memory and exports
//! them as GeoJSON for a browser map to draw.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::MapConfig;
use crate::html::escape;
use crate::models::{GeoBounds, GeoPoint, PollingSite, SiteType};
use crate::{PollMapError, Result};

pub type MarkerId = u64;

/// Icon variants drawn on the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerIcon {
    User,
    Polling,
    EarlyVoting,
}

impl From<SiteType> for MarkerIcon {
    fn from(site_type: SiteType) -> Self {
        match site_type {
            SiteType::Polling => MarkerIcon::Polling,
            SiteType::EarlyVoting => MarkerIcon::EarlyVoting,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub position: GeoPoint,
    pub icon: MarkerIcon,
    pub title: String,
    /// Popup body as an HTML fragment
    pub popup: String,
}

/// Seam to the map rendering widget
pub trait MapWidget {
    /// Create the widget centered on `center`
    fn create(center: GeoPoint, zoom: u8) -> Self
    where
        Self: Sized;

    fn add_marker(&mut self, marker: Marker) -> MarkerId;

    fn remove_marker(&mut self, id: MarkerId);

    fn open_popup(&mut self, id: MarkerId);

    fn set_view(&mut self, center: GeoPoint, zoom: u8);

    /// Show all of `bounds`, zooming in no further than `max_zoom`
    fn fit_bounds(&mut self, bounds: GeoBounds, max_zoom: u8);
}

/// The map widget plus the markers placed for the current search
pub struct MapView<W: MapWidget> {
    widget: Option<W>,
    user_marker: Option<(MarkerId, GeoPoint)>,
    site_markers: Vec<(MarkerId, GeoPoint)>,
    user_zoom: u8,
    max_fit_zoom: u8,
}

impl<W: MapWidget> MapView<W> {
    #[must_use]
    pub fn new(user_zoom: u8, max_fit_zoom: u8) -> Self {
        Self {
            widget: None,
            user_marker: None,
            site_markers: Vec::new(),
            user_zoom,
            max_fit_zoom,
        }
    }

    /// Map view created and initialized from configuration
    #[must_use]
    pub fn from_config(config: &MapConfig) -> Self {
        let mut view = Self::new(config.user_zoom, config.max_fit_zoom);
        view.init(config.center, config.zoom);
        view
    }

    /// Create the widget; later calls leave the existing widget alone
    pub fn init(&mut self, center: GeoPoint, zoom: u8) {
        if self.widget.is_some() {
            debug!("Map already initialized");
            return;
        }
        self.widget = Some(W::create(center, zoom));
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.widget.is_some()
    }

    #[must_use]
    pub fn widget(&self) -> Option<&W> {
        self.widget.as_ref()
    }

    fn widget_mut(&mut self) -> Result<&mut W> {
        self.widget.as_mut().ok_or(PollMapError::MapNotInitialized)
    }

    #[must_use]
    pub fn user_position(&self) -> Option<GeoPoint> {
        self.user_marker.map(|(_, point)| point)
    }

    #[must_use]
    pub fn site_marker_count(&self) -> usize {
        self.site_markers.len()
    }

    /// Replace the user marker with one at `point` and open its label
    pub fn set_user_marker(&mut self, point: GeoPoint) -> Result<()> {
        let previous = self.user_marker.take();
        let widget = self.widget_mut()?;
        if let Some((id, _)) = previous {
            widget.remove_marker(id);
        }

        let id = widget.add_marker(Marker {
            position: point,
            icon: MarkerIcon::User,
            title: "Your Location".to_string(),
            popup: "<div class=\"p-2\"><h6>Your Location</h6>\
                    <p class=\"mb-0 small\">This is your entered location</p></div>"
                .to_string(),
        });
        widget.open_popup(id);
        self.user_marker = Some((id, point));
        Ok(())
    }

    /// Replace all site markers; sites without coordinates or address are skipped.
    /// Returns the number of markers placed.
    pub fn set_site_markers(&mut self, sites: &[PollingSite]) -> Result<usize> {
        let origin = self.user_position();
        let previous = std::mem::take(&mut self.site_markers);
        let widget = self.widget_mut()?;
        for (id, _) in previous {
            widget.remove_marker(id);
        }

        let mut placed = Vec::with_capacity(sites.len());
        for site in sites {
            let Some(position) = site.position().filter(|_| site.is_mappable()) else {
                debug!("Skipping site '{}' without coordinates or address", site.name);
                continue;
            };
            let id = widget.add_marker(Marker {
                position,
                icon: site.site_type.into(),
                title: site.name.clone(),
                popup: site_popup(site, origin),
            });
            placed.push((id, position));
        }

        let count = placed.len();
        self.site_markers = placed;
        debug!("Placed {} of {} site markers", count, sites.len());
        Ok(count)
    }

    pub fn recenter(&mut self, point: GeoPoint, zoom: u8) -> Result<()> {
        self.widget_mut()?.set_view(point, zoom);
        Ok(())
    }

    /// Fit the viewport to the user and site markers.
    /// Without site markers the view centers on the user at the wider user zoom.
    pub fn fit_to_markers(&mut self) -> Result<()> {
        let user = self.user_position();
        let points: Vec<GeoPoint> = user
            .into_iter()
            .chain(self.site_markers.iter().map(|(_, point)| *point))
            .collect();
        let has_sites = !self.site_markers.is_empty();
        let (user_zoom, max_fit_zoom) = (self.user_zoom, self.max_fit_zoom);

        let widget = self.widget_mut()?;
        match (has_sites, user) {
            (false, Some(point)) => widget.set_view(point, user_zoom),
            (false, None) => debug!("No markers to fit"),
            (true, _) => {
                if let Some(bounds) = GeoBounds::from_points(points) {
                    widget.fit_bounds(bounds, max_fit_zoom);
                }
            }
        }
        Ok(())
    }

    /// Remove the user marker and every site marker
    pub fn clear(&mut self) {
        let user = self.user_marker.take();
        let sites = std::mem::take(&mut self.site_markers);
        if let Some(widget) = self.widget.as_mut() {
            for (id, _) in user.into_iter().chain(sites) {
                widget.remove_marker(id);
            }
        }
    }
}

fn site_popup(site: &PollingSite, origin: Option<GeoPoint>) -> String {
    let address = urlencoding::encode(&site.address);
    let mut html = format!(
        "<div class=\"p-2\" style=\"max-width: 300px;\"><h6>{}</h6>\
         <p class=\"mb-2\"><strong>Address:</strong><br>{}</p>\
         <p class=\"mb-2\"><strong>Hours:</strong><br>{}</p>",
        escape(&site.name),
        escape(&site.address),
        escape(&site.hours),
    );
    if let Some(notes) = site.notes() {
        html.push_str(&format!(
            "<p class=\"mb-2\"><strong>Notes:</strong><br>{}</p>",
            escape(notes)
        ));
    }
    html.push_str("<div class=\"d-flex gap-2\">");
    if let Some(origin) = origin {
        html.push_str(&format!(
            "<a href=\"https://www.google.com/maps/dir/?api=1&amp;origin={},{}&amp;destination={}\" \
             target=\"_blank\" class=\"btn btn-sm btn-primary\">Directions</a>",
            origin.lat, origin.lng, address
        ));
    }
    html.push_str(&format!(
        "<a href=\"https://maps.google.com/?q={address}\" target=\"_blank\" \
         class=\"btn btn-sm btn-outline-primary\">Google Maps</a></div></div>"
    ));
    html
}

/// In-memory map widget that exports GeoJSON
#[derive(Debug, Clone)]
pub struct GeoJsonCanvas {
    center: GeoPoint,
    zoom: u8,
    markers: BTreeMap<MarkerId, Marker>,
    open_popup: Option<MarkerId>,
    next_id: MarkerId,
}

impl GeoJsonCanvas {
    #[must_use]
    pub fn center(&self) -> GeoPoint {
        self.center
    }

    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    #[must_use]
    pub fn markers_with_icon(&self, icon: MarkerIcon) -> Vec<&Marker> {
        self.markers.values().filter(|m| m.icon == icon).collect()
    }

    /// Markers as a GeoJSON `FeatureCollection`, with the viewport as a foreign member
    #[must_use]
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .markers
            .iter()
            .map(|(id, marker)| {
                json!({
                    "type": "Feature",
                    "geometry": {
                        "type": "Point",
                        "coordinates": [marker.position.lng, marker.position.lat],
                    },
                    "properties": {
                        "id": id,
                        "icon": marker.icon,
                        "title": marker.title,
                        "popup": marker.popup,
                        "popup_open": self.open_popup == Some(*id),
                    },
                })
            })
            .collect();

        json!({
            "type": "FeatureCollection",
            "features": features,
            "view": {
                "center": [self.center.lng, self.center.lat],
                "zoom": self.zoom,
            },
        })
    }
}

/// Web-mercator zoom at which `span_degrees` still fits in one 256px tile
fn zoom_for_span(span_degrees: f64) -> u8 {
    if span_degrees <= f64::EPSILON {
        return u8::MAX;
    }
    let zoom = (360.0 / span_degrees).log2().floor();
    zoom.clamp(0.0, 19.0) as u8
}

impl MapWidget for GeoJsonCanvas {
    fn create(center: GeoPoint, zoom: u8) -> Self {
        Self {
            center,
            zoom,
            markers: BTreeMap::new(),
            open_popup: None,
            next_id: 1,
        }
    }

    fn add_marker(&mut self, marker: Marker) -> MarkerId {
        let id = self.next_id;
        self.next_id += 1;
        self.markers.insert(id, marker);
        id
    }

    fn remove_marker(&mut self, id: MarkerId) {
        self.markers.remove(&id);
        if self.open_popup == Some(id) {
            self.open_popup = None;
        }
    }

    fn open_popup(&mut self, id: MarkerId) {
        if self.markers.contains_key(&id) {
            self.open_popup = Some(id);
        }
    }

    fn set_view(&mut self, center: GeoPoint, zoom: u8) {
        self.center = center;
        self.zoom = zoom;
    }

    fn fit_bounds(&mut self, bounds: GeoBounds, max_zoom: u8) {
        let span = (bounds.north_east.lat - bounds.south_west.lat)
            .max(bounds.north_east.lng - bounds.south_west.lng);
        self.center = bounds.center();
        self.zoom = zoom_for_span(span).min(max_zoom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str, site_type: SiteType, lat: Option<f64>, lon: Option<f64>) -> PollingSite {
        PollingSite {
            name: name.to_string(),
            address: format!("{name} Street, San Francisco, CA 94105"),
            hours: "7am-8pm".to_string(),
            notes: None,
            site_type,
            lat,
            lon,
        }
    }

    fn view() -> MapView<GeoJsonCanvas> {
        let mut view = MapView::new(12, 15);
        view.init(GeoPoint::new(36.77, -119.41), 6);
        view
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut view = view();
        view.set_user_marker(GeoPoint::new(37.0, -122.0)).unwrap();
        view.init(GeoPoint::new(0.0, 0.0), 3);
        let canvas = view.widget().unwrap();
        assert_eq!(canvas.markers().count(), 1);
        assert_eq!(canvas.zoom(), 6);
    }

    #[test]
    fn test_recenter() {
        let mut view = view();
        assert!(view.is_initialized());
        view.recenter(GeoPoint::new(38.58, -121.49), 10).unwrap();
        let canvas = view.widget().unwrap();
        assert_eq!(canvas.center(), GeoPoint::new(38.58, -121.49));
        assert_eq!(canvas.zoom(), 10);
    }

    #[test]
    fn test_uninitialized_map_fails() {
        let mut view: MapView<GeoJsonCanvas> = MapView::new(12, 15);
        assert!(!view.is_initialized());
        assert!(view.recenter(GeoPoint::new(0.0, 0.0), 3).is_err());
        assert!(matches!(
            view.set_user_marker(GeoPoint::new(0.0, 0.0)),
            Err(PollMapError::MapNotInitialized)
        ));
        assert!(view.user_position().is_none());
        view.clear();
    }

    #[test]
    fn test_single_user_marker_after_repeated_set() {
        let mut view = view();
        let first = GeoPoint::new(37.0, -122.0);
        let second = GeoPoint::new(38.0, -121.0);

        view.clear();
        view.set_user_marker(first).unwrap();
        view.set_user_marker(second).unwrap();

        let canvas = view.widget().unwrap();
        let users = canvas.markers_with_icon(MarkerIcon::User);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].position, second);
        assert_eq!(view.user_position(), Some(second));
        assert_eq!(canvas.to_geojson()["features"][0]["properties"]["popup_open"], true);
    }

    #[test]
    fn test_site_markers_skip_incomplete_sites() {
        let mut view = view();
        let mut no_address = site("Gym", SiteType::Polling, Some(37.1), Some(-122.1));
        no_address.address = "  ".to_string();
        let sites = vec![
            site("Hall", SiteType::Polling, Some(37.2), Some(-122.2)),
            site("Library", SiteType::EarlyVoting, Some(37.3), Some(-122.3)),
            site("School", SiteType::Polling, None, Some(-122.4)),
            no_address,
        ];

        let placed = view.set_site_markers(&sites).unwrap();
        assert_eq!(placed, 2);
        let canvas = view.widget().unwrap();
        assert_eq!(canvas.markers_with_icon(MarkerIcon::Polling).len(), 1);
        assert_eq!(canvas.markers_with_icon(MarkerIcon::EarlyVoting).len(), 1);
    }

    #[test]
    fn test_site_markers_replace_previous_set() {
        let mut view = view();
        let sites = vec![
            site("Hall", SiteType::Polling, Some(37.2), Some(-122.2)),
            site("Library", SiteType::EarlyVoting, Some(37.3), Some(-122.3)),
        ];
        view.set_site_markers(&sites).unwrap();
        view.set_site_markers(&sites[..1]).unwrap();

        assert_eq!(view.site_marker_count(), 1);
        assert_eq!(view.widget().unwrap().markers().count(), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut view = view();
        view.set_user_marker(GeoPoint::new(37.0, -122.0)).unwrap();
        view.set_site_markers(&[site("Hall", SiteType::Polling, Some(37.2), Some(-122.2))])
            .unwrap();
        view.clear();

        assert_eq!(view.widget().unwrap().markers().count(), 0);
        assert!(view.user_position().is_none());
        assert_eq!(view.site_marker_count(), 0);
    }

    #[test]
    fn test_fit_without_sites_centers_on_user() {
        let mut view = view();
        let user = GeoPoint::new(37.79, -122.39);
        view.set_user_marker(user).unwrap();
        view.fit_to_markers().unwrap();

        let canvas = view.widget().unwrap();
        assert_eq!(canvas.center(), user);
        assert_eq!(canvas.zoom(), 12);
    }

    #[test]
    fn test_fit_with_sites_caps_zoom() {
        let mut view = view();
        view.set_user_marker(GeoPoint::new(37.7900, -122.3900)).unwrap();
        view.set_site_markers(&[site("Hall", SiteType::Polling, Some(37.7901), Some(-122.3901))])
            .unwrap();
        view.fit_to_markers().unwrap();
        assert_eq!(view.widget().unwrap().zoom(), 15);

        view.set_site_markers(&[site("Far", SiteType::Polling, Some(34.05), Some(-118.24))])
            .unwrap();
        view.fit_to_markers().unwrap();
        let canvas = view.widget().unwrap();
        assert!(canvas.zoom() < 10);
        assert!(GeoBounds::from_points([
            GeoPoint::new(37.79, -122.39),
            GeoPoint::new(34.05, -118.24)
        ])
        .unwrap()
        .contains(&canvas.center()));
    }

    #[test]
    fn test_popup_escapes_and_links() {
        let mut hall = site("Hall <b>", SiteType::Polling, Some(37.2), Some(-122.2));
        hall.notes = Some("Use side entrance".to_string());
        let popup = site_popup(&hall, Some(GeoPoint::new(37.0, -122.0)));
        assert!(popup.contains("Hall &lt;b&gt;"));
        assert!(popup.contains("Use side entrance"));
        assert!(popup.contains("Directions"));
        assert!(popup.contains("https://maps.google.com/?q="));

        let without_origin = site_popup(&hall, None);
        assert!(!without_origin.contains("Directions"));
    }

    #[test]
    fn test_geojson_coordinates_are_lng_lat() {
        let mut view = view();
        view.set_user_marker(GeoPoint::new(37.5, -122.5)).unwrap();
        let geojson = view.widget().unwrap().to_geojson();
        assert_eq!(geojson["type"], "FeatureCollection");
        assert_eq!(
            geojson["features"][0]["geometry"]["coordinates"],
            json!([-122.5, 37.5])
        );
        assert_eq!(geojson["features"][0]["properties"]["icon"], "user");
    }
}
