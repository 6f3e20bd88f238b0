//! In-process stand-ins for the cache and the lease store.
//!
//! They honour expiry against the tokio clock, so tests running with a
//! paused clock can observe TTLs lapse, and they can be told to fail.

use super::{ttl_secs, CacheStore, LeaseId, LeaseStore, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stand-in expiry for TTLs too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn expiry(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl).unwrap_or(now + FAR_FUTURE)
}

fn injected_failure() -> StoreError {
    StoreError::Rejected("injected failure".to_owned())
}

#[derive(Debug)]
struct Failures {
    all: AtomicBool,
    keys: Mutex<HashSet<String>>,
    latency: Mutex<Duration>,
}

impl Failures {
    fn new() -> Self {
        Self {
            all: AtomicBool::new(false),
            keys: Mutex::new(HashSet::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    async fn check(&self, key: &str) -> Result<(), StoreError> {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.all.load(Ordering::SeqCst) || lock(&self.keys).contains(key) {
            return Err(injected_failure());
        }

        Ok(())
    }
}

#[derive(Debug)]
struct CacheEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// Expiring key/value map behaving like `SET key value EX ttl`.
#[derive(Debug)]
pub struct MemoryCache {
    name: &'static str,
    entries: Mutex<HashMap<String, CacheEntry>>,
    failures: Failures,
    writes: Mutex<Vec<String>>,
}

impl MemoryCache {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            failures: Failures::new(),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        lock(&self.entries)
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.payload.clone())
    }

    /// Remaining time to live of a key that has not expired yet.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        lock(&self.entries)
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    /// Number of keys that have not expired.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.entries)
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempted writes, failed ones included.
    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    /// Keys in the order writes were attempted.
    pub fn write_log(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    pub fn fail_all(&self, fail: bool) {
        self.failures.all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_key(&self, key: &str) {
        lock(&self.failures.keys).insert(key.to_owned());
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.failures.latency) = latency;
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        lock(&self.writes).push(key.to_owned());
        self.failures.check(key).await?;

        lock(&self.entries).insert(
            key.to_owned(),
            CacheEntry {
                payload: payload.to_vec(),
                expires_at: expiry(Duration::from_secs(ttl_secs(ttl))),
            },
        );

        Ok(())
    }
}

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    expires_at: Instant,
}

/// Lease-scoped key/value map. A key lives as long as its lease.
#[derive(Debug)]
pub struct MemoryLeaseStore {
    name: &'static str,
    next_lease: AtomicI64,
    leases: Mutex<HashMap<LeaseId, Lease>>,
    entries: Mutex<HashMap<String, (Vec<u8>, LeaseId)>>,
    fail_grants: AtomicBool,
    failures: Failures,
    puts: AtomicUsize,
}

impl MemoryLeaseStore {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_lease: AtomicI64::new(1),
            leases: Mutex::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
            fail_grants: AtomicBool::new(false),
            failures: Failures::new(),
            puts: AtomicUsize::new(0),
        }
    }

    fn is_alive(&self, lease: LeaseId) -> bool {
        let now = Instant::now();
        lock(&self.leases)
            .get(&lease)
            .is_some_and(|lease| lease.expires_at > now)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let (payload, lease) = lock(&self.entries).get(key).cloned()?;
        self.is_alive(lease).then_some(payload)
    }

    pub fn lease_of(&self, key: &str) -> Option<LeaseId> {
        let (_, lease) = lock(&self.entries).get(key).cloned()?;
        self.is_alive(lease).then_some(lease)
    }

    pub fn lease_ttl(&self, lease: LeaseId) -> Option<Duration> {
        lock(&self.leases).get(&lease).map(|lease| lease.ttl)
    }

    /// Attempted puts, failed ones included.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn fail_grants(&self, fail: bool) {
        self.fail_grants.store(fail, Ordering::SeqCst);
    }

    pub fn fail_all(&self, fail: bool) {
        self.failures.all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_key(&self, key: &str) {
        lock(&self.failures.keys).insert(key.to_owned());
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        if self.fail_grants.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }

        let ttl = Duration::from_secs(ttl_secs(ttl));
        let id = LeaseId(self.next_lease.fetch_add(1, Ordering::SeqCst));
        lock(&self.leases).insert(
            id,
            Lease {
                ttl,
                expires_at: expiry(ttl),
            },
        );

        Ok(id)
    }

    async fn put_with_lease(
        &self,
        key: &str,
        payload: &[u8],
        lease: LeaseId,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.failures.check(key).await?;

        if !self.is_alive(lease) {
            return Err(StoreError::Rejected(format!("lease {} not found", lease)));
        }

        lock(&self.entries).insert(key.to_owned(), (payload.to_vec(), lease));

        Ok(())
    }
}
