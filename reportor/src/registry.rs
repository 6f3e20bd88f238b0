//! Read-only views of the host application's state.
//!
//! Every accessor returns a point-in-time copy, so a sync tick never holds
//! on to the host's collections while it talks to the network.

use crate::identity::NodeIdentity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub trait DeviceRegistry: Send + Sync + 'static {
    type Device: Serialize + Send + Sync;

    /// Registry key and record for every known device.
    fn devices(&self) -> Vec<(String, Self::Device)>;
}

pub trait StreamRegistry: Send + Sync + 'static {
    fn streams(&self) -> Vec<StreamSnapshot>;
}

pub trait SystemInfo: Send + Sync + 'static {
    type Info: Serialize + Send + Sync;

    fn snapshot(&self) -> Self::Info;

    /// Address other nodes should use to reach this one.
    fn local_ip(&self) -> String;
}

/// What the stream registry knows about one active stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub path: String,
    pub state: i64,
    pub started_at: DateTime<Utc>,
    pub stream_type: String,
}

/// Payload published for every active stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamChannel<'a> {
    #[serde(rename = "stream_path")]
    pub path: &'a str,
    #[serde(rename = "monibuca_id")]
    pub node_id: &'a NodeIdentity,
    #[serde(rename = "monibuca_ip")]
    pub node_ip: &'a str,
    #[serde(rename = "stream_state")]
    pub state: i64,
    /// Milliseconds since the unix epoch.
    #[serde(rename = "stream_create_time")]
    pub created_at: i64,
    pub stream_type: &'a str,
}

impl<'a> StreamChannel<'a> {
    pub fn new(stream: &'a StreamSnapshot, node_id: &'a NodeIdentity, node_ip: &'a str) -> Self {
        Self {
            path: &stream.path,
            node_id,
            node_ip,
            state: stream.state,
            created_at: stream.started_at.timestamp_millis(),
            stream_type: &stream.stream_type,
        }
    }
}

/// A concurrently mutable keyed collection for hosts that don't bring their own.
#[derive(Debug)]
pub struct MemoryRegistry<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> Default for MemoryRegistry<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> MemoryRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: V) -> Option<V> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<(String, V)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl<V> DeviceRegistry for MemoryRegistry<V>
where
    V: Serialize + Clone + Send + Sync + 'static,
{
    type Device = V;

    fn devices(&self) -> Vec<(String, V)> {
        self.snapshot()
    }
}

impl StreamRegistry for MemoryRegistry<StreamSnapshot> {
    fn streams(&self) -> Vec<StreamSnapshot> {
        self.snapshot()
            .into_iter()
            .map(|(_, stream)| stream)
            .collect()
    }
}
