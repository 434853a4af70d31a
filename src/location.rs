//! Device location
//!
//! The platform location service is permission-gated and may be slow, so
//! callers go through [`DeviceLocator`] with a bounded wait. [`CachedLocator`]
//! reuses a recent fix within the configured maximum age.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::models::GeoPoint;

/// Failure classes reported by a location service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location access denied by user.")]
    PermissionDenied,

    #[error("Location information is unavailable.")]
    Unavailable,

    #[error("Location request timed out.")]
    Timeout,

    #[error("Geolocation is not supported by this device.")]
    Unsupported,
}

/// Request options for a position fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionOptions {
    /// Prefer a precise fix over a fast one
    pub high_accuracy: bool,
    /// Upper bound on the wait for a fix
    pub timeout: Duration,
    /// Age up to which a previous fix may be reused
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(300),
        }
    }
}

/// Source of the user's current position
#[async_trait]
pub trait DeviceLocator: Send + Sync {
    async fn current_position(&self, options: &PositionOptions) -> Result<GeoPoint, LocationError>;
}

/// Ask `locator` for a position, failing with `Timeout` once `options.timeout` elapses
#[instrument(level = "debug", skip(locator))]
pub async fn locate_with_timeout<L: DeviceLocator + ?Sized>(
    locator: &L,
    options: &PositionOptions,
) -> Result<GeoPoint, LocationError> {
    match tokio::time::timeout(options.timeout, locator.current_position(options)).await {
        Ok(result) => result,
        Err(_) => {
            debug!("No position within {:?}", options.timeout);
            Err(LocationError::Timeout)
        }
    }
}

/// Locator answering with a preset position, e.g. from the command line
#[derive(Debug, Clone)]
pub struct FixedLocator {
    position: Option<GeoPoint>,
}

impl FixedLocator {
    #[must_use]
    pub fn new(position: GeoPoint) -> Self {
        Self {
            position: Some(position),
        }
    }

    /// Locator for a device without location support
    #[must_use]
    pub fn unsupported() -> Self {
        Self { position: None }
    }
}

#[async_trait]
impl DeviceLocator for FixedLocator {
    async fn current_position(&self, _options: &PositionOptions) -> Result<GeoPoint, LocationError> {
        self.position.ok_or(LocationError::Unsupported)
    }
}

/// Wraps a locator and reuses its last fix while younger than `maximum_age`
pub struct CachedLocator<L> {
    inner: L,
    last_fix: Mutex<Option<(GeoPoint, Instant)>>,
}

impl<L: DeviceLocator> CachedLocator<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            last_fix: Mutex::new(None),
        }
    }

    fn cached(&self, maximum_age: Duration) -> Option<GeoPoint> {
        let last_fix = *self.last_fix.lock().ok()?;
        last_fix
            .filter(|(_, at)| at.elapsed() <= maximum_age)
            .map(|(point, _)| point)
    }
}

#[async_trait]
impl<L: DeviceLocator> DeviceLocator for CachedLocator<L> {
    async fn current_position(&self, options: &PositionOptions) -> Result<GeoPoint, LocationError> {
        if let Some(point) = self.cached(options.maximum_age) {
            debug!("Reusing cached position {}", point.format_coordinates());
            return Ok(point);
        }

        let point = self.inner.current_position(options).await?;
        if let Ok(mut guard) = self.last_fix.lock() {
            *guard = Some((point, Instant::now()));
        }
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLocator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeviceLocator for CountingLocator {
        async fn current_position(&self, _: &PositionOptions) -> Result<GeoPoint, LocationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GeoPoint::new(37.0 + n as f64, -122.0))
        }
    }

    struct StalledLocator;

    #[async_trait]
    impl DeviceLocator for StalledLocator {
        async fn current_position(&self, _: &PositionOptions) -> Result<GeoPoint, LocationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(LocationError::Unavailable)
        }
    }

    #[tokio::test]
    async fn test_fixed_locator() {
        let options = PositionOptions::default();
        let point = GeoPoint::new(37.79, -122.39);
        assert_eq!(
            FixedLocator::new(point).current_position(&options).await,
            Ok(point)
        );
        assert_eq!(
            FixedLocator::unsupported().current_position(&options).await,
            Err(LocationError::Unsupported)
        );
    }

    #[tokio::test]
    async fn test_cached_locator_reuses_fresh_fix() {
        let locator = CachedLocator::new(CountingLocator {
            calls: AtomicUsize::new(0),
        });
        let options = PositionOptions::default();

        let first = locator.current_position(&options).await.unwrap();
        let second = locator.current_position(&options).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(locator.inner.calls.load(Ordering::SeqCst), 1);

        let no_reuse = PositionOptions {
            maximum_age: Duration::ZERO,
            ..options
        };
        std::thread::sleep(Duration::from_millis(2));
        let third = locator.current_position(&no_reuse).await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let options = PositionOptions {
            timeout: Duration::from_millis(50),
            ..PositionOptions::default()
        };
        assert_eq!(
            locate_with_timeout(&StalledLocator, &options).await,
            Err(LocationError::Timeout)
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            LocationError::PermissionDenied.to_string(),
            "Location access denied by user."
        );
        assert_eq!(LocationError::Timeout.to_string(), "Location request timed out.");
    }
}
