use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use pollmap::config::PollMapConfig;
use pollmap::{
    CachedLocator, FixedLocator, GeoJsonCanvas, GeoPoint, MapView, NominatimClient,
    PersistentCache, PollingLocationClient, SearchController, telemetry,
};

type CliController =
    SearchController<NominatimClient, PollingLocationClient, CachedLocator<FixedLocator>, GeoJsonCanvas>;

/// Find polling places and early voting sites
#[derive(Debug, Parser)]
#[command(name = "pollmap")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/pollmap/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the map markers as GeoJSON after a search
    #[arg(long, global = true)]
    geojson: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Commands {
    /// Run the polling-location backend and static front-end
    Serve,

    /// Find polling sites for a street address
    Search {
        /// Address words, joined with spaces
        #[arg(required = true, num_args = 1..)]
        address: Vec<String>,
    },

    /// Find polling sites around a position
    #[command(allow_negative_numbers = true)]
    Locate {
        #[arg(value_parser = latitude)]
        lat: f64,
        #[arg(value_parser = longitude)]
        lng: f64,
    },

    /// Show the configuration path and effective settings
    Config,
}

fn latitude(value: &str) -> Result<f64, String> {
    let lat: f64 = value.parse().map_err(|_| format!("Invalid latitude '{value}'"))?;
    if (-90.0..=90.0).contains(&lat) {
        Ok(lat)
    } else {
        Err("latitude must be between -90 and 90".to_string())
    }
}

fn longitude(value: &str) -> Result<f64, String> {
    let lng: f64 = value.parse().map_err(|_| format!("Invalid longitude '{value}'"))?;
    if (-180.0..=180.0).contains(&lng) {
        Ok(lng)
    } else {
        Err("longitude must be between -180 and 180".to_string())
    }
}

fn build_controller(
    config: &PollMapConfig,
    position: Option<GeoPoint>,
) -> Result<CliController> {
    let mut geocoder = NominatimClient::new(&config.geocoding, config.region.clone())?;
    if config.cache.enabled {
        let cache = PersistentCache::open(&config.cache.location)
            .with_context(|| format!("Failed to open cache at {}", config.cache.location))?;
        let ttl = Duration::from_secs(u64::from(config.cache.ttl_hours) * 3600);
        geocoder = geocoder.with_cache(Arc::new(cache), ttl);
    }

    let polling = PollingLocationClient::new(&config.backend)?;
    let locator = CachedLocator::new(position.map_or_else(FixedLocator::unsupported, FixedLocator::new));

    Ok(SearchController::new(
        config.address_validator(),
        geocoder,
        polling,
        locator,
        MapView::from_config(&config.map),
    )
    .with_position_options(config.location.position_options())
    .with_reverse_lookup(config.location.show_address))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = PollMapConfig::load_from_path(cli.config)?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    telemetry::init_logging(&config.logging)?;
    debug!("Loaded configuration: {:?}", config);

    match cli.command {
        Commands::Serve => pollmap::server::run(&config).await,
        Commands::Config => {
            let dir = PollMapConfig::ensure_config_dir()?;
            println!("Config directory: {}", dir.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Search { address } => {
            let mut controller = build_controller(&config, None)?;
            let outcome = controller.submit(&address.join(" ")).await;
            report(&controller, cli.geojson)?;
            outcome.map(|_| ()).map_err(Into::into)
        }
        Commands::Locate { lat, lng } => {
            let mut controller = build_controller(&config, Some(GeoPoint::new(lat, lng)))?;
            let outcome = controller.use_current_location().await;
            if let Some(address) = controller.resolved_address() {
                println!("Your location: {address}");
            }
            report(&controller, cli.geojson)?;
            outcome.map(|_| ()).map_err(Into::into)
        }
    }
}

fn report(
    controller: &CliController,
    geojson: bool,
) -> Result<()> {
    print!("{}", controller.panel());
    if geojson {
        if let Some(canvas) = controller.map().widget() {
            println!("{}", serde_json::to_string_pretty(&canvas.to_geojson())?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let result = run(Cli::parse()).await;
    telemetry::shutdown();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search_collects_words() {
        let cli = Cli::try_parse_from([
            "pollmap",
            "--verbose",
            "search",
            "555 Market St,",
            "San Francisco, CA 94105",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Commands::Search {
                address: vec!["555 Market St,".to_string(), "San Francisco, CA 94105".to_string()]
            }
        );
    }

    #[test]
    fn test_parse_locate_with_negative_longitude() {
        let cli = Cli::try_parse_from([
            "pollmap", "locate", "37.5", "-122.25", "--config", "/tmp/p.toml",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Locate { lat: 37.5, lng: -122.25 });
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Cli::try_parse_from(["pollmap"]).is_err());
        assert!(Cli::try_parse_from(["pollmap", "locate", "95", "0"]).is_err());
        assert!(Cli::try_parse_from(["pollmap", "search"]).is_err());
        assert!(Cli::try_parse_from(["pollmap", "serve", "--config"]).is_err());

        let typo = Cli::try_parse_from(["pollmap", "search", "--geojsn", "1 Main St"]).unwrap_err();
        assert_eq!(typo.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_help_is_not_a_failure() {
        let help = Cli::try_parse_from(["pollmap", "--help"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);
        assert_eq!(help.exit_code(), 0);
    }
}
