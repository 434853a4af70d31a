//! Results panel
//!
//! Holds the loading flag, the error banner and the two site lists. Lists are
//! kept both as HTML fragments for the browser and as cards for the terminal
//! rendering produced by `Display`.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::html::escape;
use crate::models::{GeoPoint, PollingSite};

pub const NO_POLLING_PLACEHOLDER: &str = "No Election Day polling locations found.";
pub const NO_EARLY_VOTING_PLACEHOLDER: &str = "No early voting sites found.";

/// Summary of one site as shown in the panel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteCard {
    pub name: String,
    pub address: String,
    pub hours: String,
    pub notes: Option<String>,
    pub distance_km: Option<f64>,
}

impl SiteCard {
    fn from_site(site: &PollingSite, origin: Option<GeoPoint>) -> Self {
        let distance_km = origin
            .zip(site.position())
            .map(|(origin, position)| origin.distance_km(&position));
        Self {
            name: site.name.clone(),
            address: site.address.clone(),
            hours: site.hours.clone(),
            notes: site.notes().map(str::to_string),
            distance_km,
        }
    }

    fn to_html(&self) -> String {
        let mut html = format!(
            "<div class=\"card mb-2\"><div class=\"card-body p-3\">\
             <h6 class=\"card-title mb-1\">{}</h6>\
             <p class=\"card-text small mb-1\">{}</p>\
             <p class=\"card-text small mb-1\"><strong>Hours:</strong> {}</p>",
            escape(&self.name),
            escape(&self.address),
            escape(&self.hours),
        );
        if let Some(notes) = &self.notes {
            html.push_str(&format!(
                "<p class=\"card-text small text-muted mb-1\">{}</p>",
                escape(notes)
            ));
        }
        if let Some(km) = self.distance_km {
            html.push_str(&format!(
                "<p class=\"card-text small text-muted mb-0\">{km:.1} km away</p>"
            ));
        }
        html.push_str("</div></div>");
        html
    }
}

fn render_list(cards: &[SiteCard], placeholder: &str) -> String {
    if cards.is_empty() {
        return format!("<p class=\"text-muted small\">{placeholder}</p>");
    }
    cards.iter().map(SiteCard::to_html).collect()
}

/// Loading, error and results regions of the page
#[derive(Debug, Default)]
pub struct ResultsPanel {
    loading: bool,
    results_visible: bool,
    error: Option<String>,
    search_confirmed: bool,
    polling: Vec<SiteCard>,
    early_voting: Vec<SiteCard>,
    polling_html: String,
    early_voting_html: String,
}

impl ResultsPanel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Show the loading indicator and hide previous results
    pub fn show_loading(&mut self) {
        self.loading = true;
        self.results_visible = false;
        self.search_confirmed = false;
    }

    pub fn hide_loading(&mut self) {
        self.loading = false;
    }

    pub fn show_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("Showing error: {}", message);
        self.error = Some(message);
    }

    /// Mark the current search as having produced a usable result
    pub fn confirm_search(&mut self) {
        self.search_confirmed = true;
    }

    /// Clear the error banner if the current search was confirmed.
    /// Returns whether an error was cleared.
    pub fn clear_error(&mut self) -> bool {
        if !self.search_confirmed {
            return false;
        }
        self.error.take().is_some()
    }

    /// Render both site lists; `origin` adds distances to the cards
    pub fn render_sites(
        &mut self,
        polling: &[PollingSite],
        early_voting: &[PollingSite],
        origin: Option<GeoPoint>,
    ) {
        self.polling = polling
            .iter()
            .map(|site| SiteCard::from_site(site, origin))
            .collect();
        self.early_voting = early_voting
            .iter()
            .map(|site| SiteCard::from_site(site, origin))
            .collect();
        self.polling_html = render_list(&self.polling, NO_POLLING_PLACEHOLDER);
        self.early_voting_html = render_list(&self.early_voting, NO_EARLY_VOTING_PLACEHOLDER);
        self.results_visible = true;
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn results_visible(&self) -> bool {
        self.results_visible
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn polling_cards(&self) -> &[SiteCard] {
        &self.polling
    }

    #[must_use]
    pub fn early_voting_cards(&self) -> &[SiteCard] {
        &self.early_voting
    }

    #[must_use]
    pub fn polling_html(&self) -> &str {
        &self.polling_html
    }

    #[must_use]
    pub fn early_voting_html(&self) -> &str {
        &self.early_voting_html
    }
}

fn write_cards(
    f: &mut fmt::Formatter<'_>,
    heading: &str,
    cards: &[SiteCard],
    placeholder: &str,
) -> fmt::Result {
    writeln!(f, "{heading}")?;
    if cards.is_empty() {
        return writeln!(f, "  {placeholder}");
    }
    for card in cards {
        writeln!(f, "  - {}", card.name)?;
        writeln!(f, "    {}", card.address)?;
        writeln!(f, "    Hours: {}", card.hours)?;
        if let Some(notes) = &card.notes {
            writeln!(f, "    {notes}")?;
        }
        if let Some(km) = card.distance_km {
            writeln!(f, "    {km:.1} km away")?;
        }
    }
    Ok(())
}

impl fmt::Display for ResultsPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.loading {
            writeln!(f, "Searching...")?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "Error: {error}")?;
        }
        if self.results_visible {
            write_cards(f, "Election Day polling locations", &self.polling, NO_POLLING_PLACEHOLDER)?;
            write_cards(
                f,
                "Early voting sites",
                &self.early_voting,
                NO_EARLY_VOTING_PLACEHOLDER,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SiteType;

    fn site(name: &str) -> PollingSite {
        PollingSite {
            name: name.to_string(),
            address: "100 Larkin St, San Francisco, CA 94102".to_string(),
            hours: "9am-5pm".to_string(),
            notes: Some("Enter on Grove St".to_string()),
            site_type: SiteType::Polling,
            lat: Some(37.7793),
            lon: Some(-122.4163),
        }
    }

    #[test]
    fn test_empty_lists_render_placeholders() {
        let mut panel = ResultsPanel::new();
        panel.render_sites(&[], &[], None);
        assert!(panel.results_visible());
        assert!(panel.polling_html().contains(NO_POLLING_PLACEHOLDER));
        assert!(panel.early_voting_html().contains(NO_EARLY_VOTING_PLACEHOLDER));
    }

    #[test]
    fn test_cards_are_escaped_and_carry_distance() {
        let mut panel = ResultsPanel::new();
        let mut hall = site("Hall & <Annex>");
        hall.notes = Some("   ".to_string());
        panel.render_sites(&[hall], &[site("Library")], Some(GeoPoint::new(37.7894, -122.4012)));

        assert_eq!(panel.polling_cards().len(), 1);
        assert!(panel.polling_cards()[0].notes.is_none());
        assert!(panel.polling_html().contains("Hall &amp; &lt;Annex&gt;"));
        assert!(panel.polling_html().contains("km away"));
        assert!(panel.early_voting_html().contains("Enter on Grove St"));
        let km = panel.early_voting_cards()[0].distance_km.unwrap();
        assert!(km > 1.0 && km < 3.0);
    }

    #[test]
    fn test_clear_error_requires_confirmed_search() {
        let mut panel = ResultsPanel::new();
        panel.show_error("Unable to find the specified address.");
        assert!(!panel.clear_error());
        assert_eq!(panel.error(), Some("Unable to find the specified address."));

        panel.confirm_search();
        assert!(panel.clear_error());
        assert!(panel.error().is_none());
        assert!(!panel.clear_error());
    }

    #[test]
    fn test_show_loading_hides_results_and_resets_confirmation() {
        let mut panel = ResultsPanel::new();
        panel.render_sites(&[site("Hall")], &[], None);
        panel.confirm_search();
        panel.show_loading();

        assert!(panel.is_loading());
        assert!(!panel.results_visible());
        panel.show_error("boom");
        assert!(!panel.clear_error());
        panel.hide_loading();
        assert!(!panel.is_loading());
    }

    #[test]
    fn test_display_text() {
        let mut panel = ResultsPanel::new();
        panel.render_sites(&[site("City Hall")], &[], None);
        let text = panel.to_string();
        assert!(text.contains("Election Day polling locations"));
        assert!(text.contains("  - City Hall"));
        assert!(text.contains("Hours: 9am-5pm"));
        assert!(text.contains(NO_EARLY_VOTING_PLACEHOLDER));
    }
}
