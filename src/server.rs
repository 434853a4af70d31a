//! Polling-location backend
//!
//! Serves `/api/polling-locations` and `/api/elections` from the Civic
//! Information API and falls back to the static front-end for every other path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal::{self, ctrl_c};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, instrument, warn};

use crate::cache::PersistentCache;
use crate::civic::{CivicApi, CivicInfoClient};
use crate::config::{PollMapConfig, ServerConfig};
use crate::geocoding::{Geocoder, NominatimClient};
use crate::models::{Election, GeoPoint, SearchResult};

pub const ADDRESS_REQUIRED_MESSAGE: &str = "Address is required";
pub const UPSTREAM_FAILURE_MESSAGE: &str =
    "Unable to fetch polling locations. Please try again later.";
const ELECTIONS_FAILURE_MESSAGE: &str = "Unable to fetch elections. Please try again later.";
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Clients shared by all handlers
pub struct AppState {
    pub civic: Arc<dyn CivicApi>,
    pub geocoder: Arc<dyn Geocoder>,
}

impl AppState {
    pub fn new(civic: Arc<dyn CivicApi>, geocoder: Arc<dyn Geocoder>) -> Arc<Self> {
        Arc::new(Self { civic, geocoder })
    }

    /// Build the production clients from configuration
    pub fn from_config(config: &PollMapConfig) -> crate::Result<Arc<Self>> {
        if config.civic.api_key.is_none() {
            warn!("No Civic API key configured; polling location lookups will fail upstream");
        }
        let civic = CivicInfoClient::new(&config.civic)?;

        let mut geocoder = NominatimClient::new(&config.geocoding, config.region.clone())?;
        if config.cache.enabled {
            match PersistentCache::open(&config.cache.location) {
                Ok(cache) => {
                    let ttl = Duration::from_secs(u64::from(config.cache.ttl_hours) * 3600);
                    geocoder = geocoder.with_cache(Arc::new(cache), ttl);
                }
                Err(e) => warn!(
                    "Failed to open cache at {}, continuing without: {}",
                    config.cache.location, e
                ),
            }
        }

        Ok(Self::new(Arc::new(civic), Arc::new(geocoder)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PollingQuery {
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    success: bool,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message,
            success: false,
        }),
    )
        .into_response()
}

/// Routes under `/api`
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/polling-locations", get(polling_locations))
        .route("/elections", get(elections))
        .with_state(state)
}

/// Full application: API, static files and middleware
pub fn app(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .nest("/api", api_router(state))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_seconds.into()),
        ))
        .layer(cors)
}

#[instrument(skip(state))]
async fn polling_locations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PollingQuery>,
) -> Response {
    let address = match (query.address.as_deref().map(str::trim), query.lat, query.lng) {
        (Some(address), _, _) if !address.is_empty() => address.to_string(),
        (_, Some(lat), Some(lng)) => {
            let point = match GeoPoint::checked(lat, lng) {
                Ok(point) => point,
                Err(e) => return bad_request(&e.user_message()),
            };
            match state.geocoder.reverse_geocode(point).await {
                Ok(address) => address,
                Err(e) => {
                    warn!("Reverse geocoding {} failed: {}", point.format_coordinates(), e);
                    return Json(SearchResult::failure(e.user_message())).into_response();
                }
            }
        }
        _ => return bad_request(ADDRESS_REQUIRED_MESSAGE),
    };

    match state.civic.voter_info(&address).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            error!("Error fetching polling locations: {}", e);
            Json(SearchResult::failure(UPSTREAM_FAILURE_MESSAGE)).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct ElectionsBody {
    success: bool,
    elections: Vec<Election>,
}

#[instrument(skip(state))]
async fn elections(State(state): State<Arc<AppState>>) -> Response {
    match state.civic.elections().await {
        Ok(elections) => Json(ElectionsBody {
            success: true,
            elections,
        })
        .into_response(),
        Err(e) => {
            error!("Error fetching elections: {}", e);
            Json(json!({"success": false, "error": ELECTIONS_FAILURE_MESSAGE})).into_response()
        }
    }
}

/// Serve until Ctrl+C or SIGTERM
pub async fn run(config: &PollMapConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let app = app(state, &config.server);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    match (&config.server.tls_cert, &config.server.tls_key) {
        #[cfg(feature = "tls")]
        (Some(cert), Some(key)) => serve_tls(app, addr, cert, key).await,
        #[cfg(not(feature = "tls"))]
        (Some(_), Some(_)) => {
            warn!("TLS certificate configured but the tls feature is disabled; serving plain HTTP");
            serve(app, addr).await
        }
        _ => serve(app, addr).await,
    }
}

async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

#[cfg(feature = "tls")]
async fn serve_tls(app: Router, addr: SocketAddr, cert: &str, key: &str) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let _ = rustls::crypto::ring::default_provider().install_default();
    let tls = RustlsConfig::from_pem_file(cert, key).await?;

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    info!("Server running at https://{}", addr);
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_deserialization() {
        let query: PollingQuery = serde_json::from_str(r#"{"lat": 37.5, "lng": -122.25}"#).unwrap();
        assert!(query.address.is_none());
        assert_eq!(query.lat, Some(37.5));
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(ErrorBody {
            error: ADDRESS_REQUIRED_MESSAGE,
            success: false,
        })
        .unwrap();
        assert_eq!(body, json!({"error": "Address is required", "success": false}));
    }
}
