//! The two reporting loops.
//!
//! The device/stream loop sleeps first and then publishes every device
//! followed by every stream. The heartbeat loop publishes first and then
//! sleeps. Both run until the process exits; the next tick is the retry
//! for anything that failed.

use crate::backend::BackendSet;
use crate::encode::encode;
use crate::identity::{self, HostMachineId, NodeIdentity};
use crate::keys::{KeySpace, RecordKeys};
use crate::publish::Publisher;
use crate::registry::{DeviceRegistry, StreamChannel, StreamRegistry, SystemInfo};
use reportor_env::{Config, InvalidSyncSettings, ModeUnrecognized};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The host application's collections, shared with both loops.
pub struct Registries<D, S, I> {
    pub devices: Arc<D>,
    pub streams: Arc<S>,
    pub system: Arc<I>,
}

impl<D, S, I> Clone for Registries<D, S, I> {
    fn clone(&self) -> Self {
        Self {
            devices: self.devices.clone(),
            streams: self.streams.clone(),
            system: self.system.clone(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error(transparent)]
    ModeUnrecognized(#[from] ModeUnrecognized),
    #[error(transparent)]
    InvalidSettings(#[from] InvalidSyncSettings),
    #[error("reporter is already running as node {0}")]
    AlreadyStarted(NodeIdentity),
}

/// Counts for one pass over a collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub records: usize,
    pub encode_failures: usize,
    pub publish_failures: usize,
}

impl TickSummary {
    pub fn published(&self) -> usize {
        self.records - self.encode_failures - self.publish_failures
    }
}

pub struct Reporter<D, S, I> {
    keys: KeySpace,
    publisher: Publisher,
    registries: Registries<D, S, I>,
    interval: Duration,
    service_interval: Duration,
}

impl<D, S, I> Reporter<D, S, I>
where
    D: DeviceRegistry,
    S: StreamRegistry,
    I: SystemInfo,
{
    pub fn new(
        config: &Config,
        node: NodeIdentity,
        backends: BackendSet,
        registries: Registries<D, S, I>,
    ) -> Self {
        Self {
            keys: KeySpace::new(config.node.owner_prefix.clone(), node),
            publisher: Publisher::new(
                backends,
                config.sync.ttl(),
                config.sync.write_timeout(),
            ),
            registries,
            interval: config.sync.interval(),
            service_interval: config.sync.service_interval(),
        }
    }

    pub fn node(&self) -> &NodeIdentity {
        self.keys.node()
    }

    pub async fn sync_devices(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        for (key, device) in self.registries.devices.devices() {
            let keys = self.keys.device(&key);
            self.publish_record(&keys, &device, &mut summary).await;
        }

        summary
    }

    pub async fn sync_streams(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        let node_ip = self.registries.system.local_ip();

        for stream in self.registries.streams.streams() {
            let keys = self.keys.stream(&stream.path);
            let channel = StreamChannel::new(&stream, self.keys.node(), &node_ip);
            self.publish_record(&keys, &channel, &mut summary).await;
        }

        summary
    }

    pub async fn sync_service(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        let info = self.registries.system.snapshot();

        self.publish_record(&self.keys.service(), &info, &mut summary)
            .await;

        summary
    }

    async fn publish_record<T>(&self, keys: &RecordKeys, record: &T, summary: &mut TickSummary)
    where
        T: Serialize + ?Sized,
    {
        summary.records += 1;

        let payload = match encode(record) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(key = %keys, %error, "Skipping record that could not be encoded");
                summary.encode_failures += 1;
                return;
            }
        };

        if !self.publisher.publish(keys, &payload).await.is_success() {
            summary.publish_failures += 1;
        }
    }

    async fn run_records(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.interval).await;

            let devices = self.sync_devices().await;
            let streams = self.sync_streams().await;

            tracing::debug!(
                devices = devices.records,
                devices_published = devices.published(),
                streams = streams.records,
                streams_published = streams.published(),
                "Synced devices and streams"
            );
        }
    }

    async fn run_heartbeat(self: Arc<Self>) {
        loop {
            let summary = self.sync_service().await;
            tracing::debug!(
                published = summary.published() == 1,
                "Synced service heartbeat"
            );

            tokio::time::sleep(self.service_interval).await;
        }
    }

    /// Start both loops on the current tokio runtime.
    pub fn spawn(self) -> ServiceHandle {
        let reporter = Arc::new(self);
        let node = reporter.node().clone();

        ServiceHandle {
            node,
            records: tokio::spawn(reporter.clone().run_records()),
            heartbeat: tokio::spawn(reporter.run_heartbeat()),
        }
    }
}

/// Owns the two loop tasks. Dropping it aborts them.
pub struct ServiceHandle {
    node: NodeIdentity,
    records: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    /// Only returns if a loop panicked.
    pub async fn wait(&mut self) {
        let (records, heartbeat) = futures::join!(&mut self.records, &mut self.heartbeat);

        for (task, result) in [("records", records), ("heartbeat", heartbeat)] {
            if let Err(error) = result {
                tracing::error!(task, %error, "Sync loop stopped");
            }
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.records.abort();
        self.heartbeat.abort();
    }
}

/// Resolve the node identity, connect the configured backends and start
/// both loops.
pub async fn start<D, S, I>(
    config: &Config,
    registries: Registries<D, S, I>,
) -> Result<ServiceHandle, StartError>
where
    D: DeviceRegistry,
    S: StreamRegistry,
    I: SystemInfo,
{
    config.sync.validate()?;

    let node = identity::resolve(&HostMachineId, &config.node.app_id);
    let backends = BackendSet::connect(config).await?;

    tracing::info!(
        node_id = %node,
        interval_secs = config.sync.interval_secs,
        service_interval_secs = config.sync.service_interval_secs,
        ttl_secs = config.sync.ttl_secs,
        "Starting reporter"
    );

    Ok(Reporter::new(config, node, backends, registries).spawn())
}
