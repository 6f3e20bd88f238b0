//! Handles to the external stores the reporter writes to.
//!
//! A connector either hands back a handle that passed its connectivity probe
//! or nothing at all. An absent backend stays absent for the lifetime of the
//! process.

pub mod etcd;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use reportor_env::{CacheMode, Config, ModeUnrecognized};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use self::etcd::EtcdStore;
pub use self::redis::{RedisCluster, RedisNode};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("redis pool: {0}")]
    Pool(#[from] bb8::RunError<::redis::RedisError>),
    #[error("etcd: {0}")]
    Etcd(#[from] etcd_client::Error),
    #[error("deadline elapsed")]
    Timeout,
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Key/value store with per-key expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn set_with_expiry(&self, key: &str, payload: &[u8], ttl: Duration)
        -> Result<(), StoreError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Store whose keys expire by being attached to a lease.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    async fn put_with_lease(&self, key: &str, payload: &[u8], lease: LeaseId)
        -> Result<(), StoreError>;
}

/// The live backends. At most one cache, at most one lease store.
#[derive(Clone, Default)]
pub struct BackendSet {
    pub cache: Option<Arc<dyn CacheStore>>,
    pub lease: Option<Arc<dyn LeaseStore>>,
}

impl BackendSet {
    pub fn new(cache: Option<Arc<dyn CacheStore>>, lease: Option<Arc<dyn LeaseStore>>) -> Self {
        Self { cache, lease }
    }

    /// Connect every backend the configuration asks for.
    ///
    /// Unreachable backends are logged and left out. The only hard failure is
    /// a cache host list paired with a mode we don't know.
    pub async fn connect(config: &Config) -> Result<Self, ModeUnrecognized> {
        let probe_timeout = config.sync.probe_timeout();

        let cache: Option<Arc<dyn CacheStore>> = if config.cache.is_configured() {
            match config.cache.mode()? {
                CacheMode::Node => RedisNode::connect(&config.cache, probe_timeout)
                    .await
                    .map(|node| Arc::new(node) as Arc<dyn CacheStore>),
                CacheMode::Cluster => RedisCluster::connect(&config.cache, probe_timeout)
                    .await
                    .map(|cluster| Arc::new(cluster) as Arc<dyn CacheStore>),
            }
        } else {
            None
        };

        let lease: Option<Arc<dyn LeaseStore>> = if config.store.is_configured() {
            EtcdStore::connect(&config.store, probe_timeout)
                .await
                .map(|store| Arc::new(store) as Arc<dyn LeaseStore>)
        } else {
            None
        };

        let backends = Self { cache, lease };

        tracing::info!(
            cache = backends.cache_name().unwrap_or("none"),
            lease = backends.lease_name().unwrap_or("none"),
            "Backends ready"
        );

        Ok(backends)
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_none() && self.lease.is_none()
    }

    pub fn cache_name(&self) -> Option<&'static str> {
        self.cache.as_ref().map(|cache| cache.name())
    }

    pub fn lease_name(&self) -> Option<&'static str> {
        self.lease.as_ref().map(|lease| lease.name())
    }
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSet")
            .field("cache", &self.cache_name())
            .field("lease", &self.lease_name())
            .finish()
    }
}

/// Whole seconds, as both stores count expiry. Sub-second TTLs round up so a
/// record never gets an expiry of zero.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 || secs == 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}
