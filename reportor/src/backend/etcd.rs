use super::{ttl_secs, LeaseId, LeaseStore, StoreError};
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, PutOptions};
use reportor_env::Store;
use std::time::Duration;
use tokio::time::timeout;

/// Read by the startup probe. Its value is irrelevant, only that the cluster answers.
const PROBE_KEY: &str = "test_key";

/// An etcd cluster. Records are attached to leases so they disappear together.
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn connect(config: &Store, probe_timeout: Duration) -> Option<Self> {
        if config.endpoints.is_empty() {
            return None;
        }

        match Self::try_connect(config, probe_timeout).await {
            Ok(store) => {
                tracing::info!(endpoints = ?config.endpoints, "Connected to etcd");
                Some(store)
            }
            Err(error) => {
                tracing::error!(endpoints = ?config.endpoints, %error, "Etcd unreachable, not using it");
                None
            }
        }
    }

    async fn try_connect(config: &Store, probe_timeout: Duration) -> Result<Self, StoreError> {
        let mut options = ConnectOptions::new().with_connect_timeout(config.dial_timeout());
        if let Some((username, password)) = config.credentials() {
            options = options.with_user(username, password);
        }

        let client = timeout(
            config.dial_timeout(),
            Client::connect(&config.endpoints, Some(options)),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let store = Self { client };
        timeout(probe_timeout, store.probe())
            .await
            .map_err(|_| StoreError::Timeout)??;

        Ok(store)
    }

    async fn probe(&self) -> Result<(), StoreError> {
        self.client.kv_client().get(PROBE_KEY, None).await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for EtcdStore {
    fn name(&self) -> &'static str {
        "etcd"
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let ttl = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let response = self.client.lease_client().grant(ttl, None).await?;

        Ok(LeaseId(response.id()))
    }

    async fn put_with_lease(
        &self,
        key: &str,
        payload: &[u8],
        lease: LeaseId,
    ) -> Result<(), StoreError> {
        self.client
            .kv_client()
            .put(key, payload, Some(PutOptions::new().with_lease(lease.0)))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_endpoints_is_absent() {
        assert!(EtcdStore::connect(&Store::default(), Duration::from_secs(1))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn failed_probe_is_absent() {
        let config = Store {
            endpoints: vec!["http://127.0.0.1:1".to_owned()],
            dial_timeout_secs: 1,
            ..Store::default()
        };

        assert!(EtcdStore::connect(&config, Duration::from_millis(500))
            .await
            .is_none());
    }
}
