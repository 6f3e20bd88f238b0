//! Fan one encoded record out to every live backend.
//!
//! Backends are written independently and concurrently. A failure is logged
//! where it happens and never stops the remaining writes; the next tick is
//! the only retry.

use crate::backend::{BackendSet, CacheStore, LeaseStore, StoreError};
use crate::keys::RecordKeys;
use futures::future::OptionFuture;
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyWrite {
    pub key: String,
    pub written: bool,
}

/// What happened on one backend for one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendOutcome {
    pub backend: &'static str,
    /// Set when no lease could be obtained. No key is written in that case.
    pub lease_failed: bool,
    pub writes: Vec<KeyWrite>,
}

impl BackendOutcome {
    pub fn is_success(&self) -> bool {
        !self.lease_failed && self.writes.iter().all(|write| write.written)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub outcomes: Vec<BackendOutcome>,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(BackendOutcome::is_success)
    }

    pub fn attempted_backends(&self) -> usize {
        self.outcomes.len()
    }

    pub fn outcome(&self, backend: &str) -> Option<&BackendOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.backend == backend)
    }
}

#[derive(Clone, Debug)]
pub struct Publisher {
    backends: BackendSet,
    ttl: Duration,
    write_timeout: Duration,
}

impl Publisher {
    pub fn new(backends: BackendSet, ttl: Duration, write_timeout: Duration) -> Self {
        Self {
            backends,
            ttl,
            write_timeout,
        }
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Every key of `keys` gets `payload` with the configured TTL. All
    /// writes of this call share one deadline. A timeout too large to
    /// represent means no deadline at all.
    pub async fn publish(&self, keys: &RecordKeys, payload: &[u8]) -> PublishReport {
        let deadline = Instant::now().checked_add(self.write_timeout);

        let cache: OptionFuture<_> = self
            .backends
            .cache
            .as_deref()
            .map(|cache| publish_to_cache(cache, keys, payload, self.ttl, deadline))
            .into();
        let lease: OptionFuture<_> = self
            .backends
            .lease
            .as_deref()
            .map(|store| publish_to_lease_store(store, keys, payload, self.ttl, deadline))
            .into();

        let (cache, lease) = futures::join!(cache, lease);

        PublishReport {
            outcomes: cache.into_iter().chain(lease).collect(),
        }
    }
}

async fn publish_to_cache(
    cache: &dyn CacheStore,
    keys: &RecordKeys,
    payload: &[u8],
    ttl: Duration,
    deadline: Option<Instant>,
) -> BackendOutcome {
    let backend = cache.name();
    let mut writes = Vec::with_capacity(2);

    for key in keys.iter() {
        let result = before(deadline, cache.set_with_expiry(key, payload, ttl)).await;
        writes.push(record_write(backend, key, result));
    }

    BackendOutcome {
        backend,
        lease_failed: false,
        writes,
    }
}

async fn publish_to_lease_store(
    store: &dyn LeaseStore,
    keys: &RecordKeys,
    payload: &[u8],
    ttl: Duration,
    deadline: Option<Instant>,
) -> BackendOutcome {
    let backend = store.name();

    let lease = match before(deadline, store.grant_lease(ttl)).await {
        Ok(lease) => lease,
        Err(error) => {
            tracing::error!(backend, key = %keys, %error, "Failed to create lease, skipping record");
            return BackendOutcome {
                backend,
                lease_failed: true,
                writes: Vec::new(),
            };
        }
    };

    let mut writes = Vec::with_capacity(2);
    for key in keys.iter() {
        let result = before(deadline, store.put_with_lease(key, payload, lease)).await;
        writes.push(record_write(backend, key, result));
    }

    BackendOutcome {
        backend,
        lease_failed: false,
        writes,
    }
}

fn record_write(backend: &'static str, key: &str, result: Result<(), StoreError>) -> KeyWrite {
    if let Err(error) = &result {
        tracing::error!(backend, key, %error, "Failed to write record");
    }

    KeyWrite {
        key: key.to_owned(),
        written: result.is_ok(),
    }
}

async fn before<T>(
    deadline: Option<Instant>,
    operation: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match deadline {
        Some(deadline) => timeout_at(deadline, operation)
            .await
            .map_err(|_| StoreError::Timeout)?,
        None => operation.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryCache, MemoryLeaseStore};
    use crate::identity::NodeIdentity;
    use crate::keys::KeySpace;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(180);
    const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

    fn device_keys() -> RecordKeys {
        KeySpace::new("m7s", NodeIdentity::new("node-1")).device("cam1")
    }

    fn publisher(cache: Option<Arc<MemoryCache>>, lease: Option<Arc<MemoryLeaseStore>>) -> Publisher {
        Publisher::new(
            BackendSet::new(
                cache.map(|cache| cache as Arc<dyn CacheStore>),
                lease.map(|lease| lease as Arc<dyn LeaseStore>),
            ),
            TTL,
            WRITE_TIMEOUT,
        )
    }

    #[tokio::test]
    async fn no_backends_is_a_no_op() {
        let report = publisher(None, None).publish(&device_keys(), b"{}").await;

        assert_eq!(report.attempted_backends(), 0);
        assert!(report.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_gets_both_keys_with_ttl() {
        let cache = Arc::new(MemoryCache::new("redis"));

        let report = publisher(Some(cache.clone()), None)
            .publish(&device_keys(), b"{\"id\":1}")
            .await;

        assert!(report.is_success());
        for key in ["gbDevices:cam1", "m7s:node-1:gbDevices:cam1"] {
            assert_eq!(cache.get(key).as_deref(), Some(&b"{\"id\":1}"[..]));
            assert_eq!(cache.ttl(key), Some(TTL));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lease_store_attaches_both_keys_to_one_lease() {
        let store = Arc::new(MemoryLeaseStore::new("etcd"));

        let report = publisher(None, Some(store.clone()))
            .publish(&device_keys(), b"{}")
            .await;

        assert!(report.is_success());
        let public = store.lease_of("gbDevices:cam1").unwrap();
        let private = store.lease_of("m7s:node-1:gbDevices:cam1").unwrap();
        assert_eq!(public, private);
        assert_eq!(store.lease_ttl(public), Some(TTL));
    }

    #[tokio::test]
    async fn failed_public_write_still_attempts_private() {
        let cache = Arc::new(MemoryCache::new("redis"));
        cache.fail_key("gbDevices:cam1");

        let report = publisher(Some(cache.clone()), None)
            .publish(&device_keys(), b"{}")
            .await;

        let outcome = report.outcome("redis").unwrap();
        assert_eq!(
            outcome.writes,
            vec![
                KeyWrite {
                    key: "gbDevices:cam1".to_owned(),
                    written: false
                },
                KeyWrite {
                    key: "m7s:node-1:gbDevices:cam1".to_owned(),
                    written: true
                },
            ]
        );
        assert!(cache.get("gbDevices:cam1").is_none());
        assert!(cache.get("m7s:node-1:gbDevices:cam1").is_some());
    }

    #[tokio::test]
    async fn failed_lease_writes_nothing() {
        let store = Arc::new(MemoryLeaseStore::new("etcd"));
        store.fail_grants(true);

        let report = publisher(None, Some(store.clone()))
            .publish(&device_keys(), b"{}")
            .await;

        let outcome = report.outcome("etcd").unwrap();
        assert!(outcome.lease_failed);
        assert!(outcome.writes.is_empty());
        assert_eq!(store.put_count(), 0);
        assert!(store.get("gbDevices:cam1").is_none());
        assert!(store.get("m7s:node-1:gbDevices:cam1").is_none());
    }

    #[tokio::test]
    async fn failing_backend_does_not_affect_the_other() {
        let cache = Arc::new(MemoryCache::new("redis"));
        cache.fail_all(true);
        let store = Arc::new(MemoryLeaseStore::new("etcd"));

        let report = publisher(Some(cache.clone()), Some(store.clone()))
            .publish(&device_keys(), b"{}")
            .await;

        assert_eq!(report.attempted_backends(), 2);
        assert!(!report.outcome("redis").unwrap().is_success());
        assert!(report.outcome("etcd").unwrap().is_success());
        assert!(store.get("gbDevices:cam1").is_some());
        assert!(store.get("m7s:node-1:gbDevices:cam1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_is_cut_off_at_the_deadline() {
        let cache = Arc::new(MemoryCache::new("redis"));
        cache.set_latency(Duration::from_secs(20));

        let report = publisher(Some(cache.clone()), None)
            .publish(&device_keys(), b"{}")
            .await;

        // The first write fits in the 30s budget, the second one does not.
        let outcome = report.outcome("redis").unwrap();
        assert!(outcome.writes[0].written);
        assert!(!outcome.writes[1].written);
    }

    #[tokio::test]
    async fn unrepresentable_write_timeout_means_no_deadline() {
        let cache = Arc::new(MemoryCache::new("redis"));
        let publisher = Publisher::new(
            BackendSet::new(Some(cache.clone() as Arc<dyn CacheStore>), None),
            TTL,
            Duration::from_secs(u64::MAX),
        );

        let report = publisher.publish(&device_keys(), b"{}").await;

        assert!(report.is_success());
        assert!(cache.get("gbDevices:cam1").is_some());
    }

    #[tokio::test]
    async fn failed_public_put_still_attaches_private_to_the_lease() {
        let store = Arc::new(MemoryLeaseStore::new("etcd"));
        store.fail_key("gbDevices:cam1");

        let report = publisher(None, Some(store.clone()))
            .publish(&device_keys(), b"{}")
            .await;

        let outcome = report.outcome("etcd").unwrap();
        assert!(!outcome.lease_failed);
        assert_eq!(
            outcome
                .writes
                .iter()
                .map(|write| write.written)
                .collect::<Vec<_>>(),
            vec![false, true]
        );
        assert_eq!(store.put_count(), 2);
        assert!(store.get("gbDevices:cam1").is_none());
        let lease = store.lease_of("m7s:node-1:gbDevices:cam1").unwrap();
        assert_eq!(store.lease_ttl(lease), Some(TTL));
    }

    #[tokio::test(start_paused = true)]
    async fn republishing_only_refreshes_expiry() {
        let cache = Arc::new(MemoryCache::new("redis"));
        let publisher = publisher(Some(cache.clone()), None);

        publisher.publish(&device_keys(), b"{}").await;
        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(cache.ttl("gbDevices:cam1"), Some(Duration::from_secs(80)));

        publisher.publish(&device_keys(), b"{}").await;

        assert_eq!(cache.get("gbDevices:cam1").as_deref(), Some(&b"{}"[..]));
        assert_eq!(cache.ttl("gbDevices:cam1"), Some(TTL));
        assert_eq!(cache.len(), 2);
    }
}
