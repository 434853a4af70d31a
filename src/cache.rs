//! On-disk TTL cache for geocoding answers
//!
//! Values are postcard-encoded next to the time they were written and the
//! lifetime they were given. Expired entries are dropped lazily on read.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fjall::Keyspace;
use rand::RngExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::task;
use tracing::{debug, instrument};

use crate::error::PollMapError;

const KEYSPACE: &str = "geocode";

#[derive(Serialize, Deserialize)]
struct Entry<T> {
    written_at: u64,
    ttl_secs: u64,
    value: T,
}

impl<T> Entry<T> {
    fn is_fresh(&self, now: u64) -> bool {
        now < self.written_at.saturating_add(self.ttl_secs)
    }
}

fn unix_now() -> Result<u64, PollMapError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| PollMapError::cache(format!("System clock before epoch: {e}")))
}

/// TTL key-value store shared behind an `Arc`
pub struct PersistentCache {
    store: Keyspace,
}

impl PersistentCache {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PollMapError> {
        let db = fjall::Database::builder(path.as_ref())
            .open()
            .map_err(|e| PollMapError::cache(e.to_string()))?;
        let store = db
            .keyspace(KEYSPACE, fjall::KeyspaceCreateOptions::default)
            .map_err(|e| PollMapError::cache(e.to_string()))?;
        Ok(Self { store })
    }

    /// Run a keyspace operation off the async runtime
    async fn blocking<R, F>(&self, op: F) -> Result<R, PollMapError>
    where
        R: Send + 'static,
        F: FnOnce(Keyspace) -> Result<R, fjall::Error> + Send + 'static,
    {
        let store = self.store.clone();
        task::spawn_blocking(move || op(store))
            .await
            .map_err(|e| PollMapError::cache(format!("Cache task failed: {e}")))?
            .map_err(|e| PollMapError::cache(e.to_string()))
    }

    #[instrument(level = "debug", skip(self, value))]
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<(), PollMapError> {
        let entry = Entry {
            written_at: unix_now()?,
            ttl_secs: ttl.as_secs(),
            value,
        };
        let bytes =
            postcard::to_stdvec(&entry).map_err(|e| PollMapError::cache(e.to_string()))?;
        let key = key.as_bytes().to_vec();
        self.blocking(move |store| store.insert(key, bytes).map(|_| ()))
            .await
    }

    /// [`put`](Self::put) with the TTL scaled by a random factor in 0.9..1.1,
    /// so a batch of lookups does not expire in the same second.
    pub async fn put_jittered<T: Serialize>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<(), PollMapError> {
        let factor: f64 = rand::rng().random_range(0.9..1.1);
        self.put(key, value, ttl.mul_f64(factor)).await
    }

    /// Fresh value for `key`, or `None` on a miss or an expired entry
    #[instrument(level = "debug", skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PollMapError> {
        let lookup = key.as_bytes().to_vec();
        let Some(bytes) = self
            .blocking(move |store| Ok(store.get(lookup)?.map(|v| v.to_vec())))
            .await?
        else {
            debug!("miss");
            return Ok(None);
        };

        let entry: Entry<T> =
            postcard::from_bytes(&bytes).map_err(|e| PollMapError::cache(e.to_string()))?;
        if entry.is_fresh(unix_now()?) {
            debug!("hit");
            return Ok(Some(entry.value));
        }

        debug!("expired");
        self.remove(key).await?;
        Ok(None)
    }

    pub async fn remove(&self, key: &str) -> Result<(), PollMapError> {
        let key = key.as_bytes().to_vec();
        self.blocking(move |store| store.remove(key).map(|_| ()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeoPoint;

    #[test]
    fn test_entry_freshness() {
        let entry = Entry {
            written_at: 100,
            ttl_secs: 10,
            value: (),
        };
        assert!(entry.is_fresh(109));
        assert!(!entry.is_fresh(110));

        let forever = Entry {
            written_at: 100,
            ttl_secs: u64::MAX,
            value: (),
        };
        assert!(forever.is_fresh(u64::MAX - 1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_geocode_round_trip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();

        let point = GeoPoint::new(37.7749, -122.4194);
        cache
            .put("geocode:sf", point, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get::<GeoPoint>("geocode:sf").await.unwrap(), Some(point));

        cache.remove("geocode:sf").await.unwrap();
        assert_eq!(cache.get::<GeoPoint>("geocode:sf").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_ttl_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();

        cache
            .put("stale", "value".to_string(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(cache.get::<String>("stale").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_jittered_entry_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path()).unwrap();

        cache
            .put_jittered("k", 42u32, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(42));
    }
}
