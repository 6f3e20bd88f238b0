use super::{ttl_secs, CacheStore, StoreError};
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::aio::ConnectionLike;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{ConnectionInfo, IntoConnectionInfo};
use reportor_env::Cache;
use std::time::Duration;
use tokio::time::timeout;

/// A single redis server reached through a bounded connection pool.
pub struct RedisNode {
    pool: Pool<RedisConnectionManager>,
}

impl RedisNode {
    /// Only the first configured host is used in node mode.
    pub async fn connect(config: &Cache, probe_timeout: Duration) -> Option<Self> {
        let host = config.hosts.first()?;

        match Self::try_connect(host, config.password(), config.pool_size, probe_timeout).await {
            Ok(node) => {
                tracing::info!(%host, pool_size = config.pool_size, "Connected to redis node");
                Some(node)
            }
            Err(error) => {
                tracing::error!(%host, %error, "Redis node unreachable, not using it");
                None
            }
        }
    }

    async fn try_connect(
        host: &str,
        password: Option<&str>,
        pool_size: u32,
        probe_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let manager = RedisConnectionManager::new(connection_info(host, password)?)?;
        let pool = Pool::builder().max_size(pool_size).build(manager).await?;

        let node = Self { pool };
        timeout(probe_timeout, node.ping())
            .await
            .map_err(|_| StoreError::Timeout)??;

        Ok(node)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.pool.get().await?;
        ping(&mut *connection).await
    }
}

#[async_trait]
impl CacheStore for RedisNode {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut connection = self.pool.get().await?;
        set_ex(&mut *connection, key, payload, ttl).await
    }
}

/// A redis cluster. The async cluster connection multiplexes and routes by
/// slot, so one connection is shared by every caller.
pub struct RedisCluster {
    connection: ClusterConnection,
}

impl RedisCluster {
    pub async fn connect(config: &Cache, probe_timeout: Duration) -> Option<Self> {
        if config.hosts.is_empty() {
            return None;
        }

        match Self::try_connect(&config.hosts, config.password(), probe_timeout).await {
            Ok(cluster) => {
                tracing::info!(hosts = ?config.hosts, "Connected to redis cluster");
                Some(cluster)
            }
            Err(error) => {
                tracing::error!(hosts = ?config.hosts, %error, "Redis cluster unreachable, not using it");
                None
            }
        }
    }

    async fn try_connect(
        hosts: &[String],
        password: Option<&str>,
        probe_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let nodes = hosts
            .iter()
            .map(|host| with_scheme(host))
            .collect::<Vec<_>>();

        let mut builder = ClusterClient::builder(nodes);
        if let Some(password) = password {
            builder = builder.password(password.to_owned());
        }
        let client = builder.build()?;

        let mut connection = timeout(probe_timeout, client.get_async_connection())
            .await
            .map_err(|_| StoreError::Timeout)??;

        timeout(probe_timeout, ping(&mut connection))
            .await
            .map_err(|_| StoreError::Timeout)??;

        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCluster {
    fn name(&self) -> &'static str {
        "redis-cluster"
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        set_ex(&mut connection, key, payload, ttl).await
    }
}

async fn ping<C>(connection: &mut C) -> Result<(), StoreError>
where
    C: ConnectionLike + Send,
{
    let _: String = redis::cmd("PING").query_async(connection).await?;
    Ok(())
}

async fn set_ex<C>(
    connection: &mut C,
    key: &str,
    payload: &[u8],
    ttl: Duration,
) -> Result<(), StoreError>
where
    C: ConnectionLike + Send,
{
    let _: () = redis::cmd("SET")
        .arg(key)
        .arg(payload)
        .arg("EX")
        .arg(ttl_secs(ttl))
        .query_async(connection)
        .await?;
    Ok(())
}

/// Hosts are configured as `host:port`; redis-rs wants a URL.
fn with_scheme(host: &str) -> String {
    if host.contains("://") {
        host.to_owned()
    } else {
        format!("redis://{}", host)
    }
}

fn connection_info(host: &str, password: Option<&str>) -> Result<ConnectionInfo, StoreError> {
    let mut info = with_scheme(host).into_connection_info()?;
    if let Some(password) = password {
        info.redis.password = Some(password.to_owned());
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ConnectionAddr;

    #[test]
    fn bare_hosts_get_a_scheme() {
        assert_eq!(with_scheme("10.0.0.1:6379"), "redis://10.0.0.1:6379");
        assert_eq!(with_scheme("rediss://cache:6380"), "rediss://cache:6380");
    }

    #[test]
    fn password_is_applied() {
        let info = connection_info("10.0.0.1:6379", Some("secret")).unwrap();

        assert_eq!(info.addr, ConnectionAddr::Tcp("10.0.0.1".to_owned(), 6379));
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
    }

    #[test]
    fn no_password_leaves_url_credentials() {
        let info = connection_info("redis://:inline@10.0.0.1:6379", None).unwrap();

        assert_eq!(info.redis.password.as_deref(), Some("inline"));
    }

    #[tokio::test]
    async fn unreachable_node_is_absent() {
        let config = Cache {
            hosts: vec!["127.0.0.1:1".to_owned()],
            ..Cache::default()
        };

        assert!(RedisNode::connect(&config, Duration::from_millis(500))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn node_without_hosts_is_absent() {
        assert!(RedisNode::connect(&Cache::default(), Duration::from_millis(500))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn unreachable_cluster_is_absent() {
        let config = Cache {
            hosts: vec!["127.0.0.1:1".to_owned(), "127.0.0.1:2".to_owned()],
            mode: "cluster".to_owned(),
            ..Cache::default()
        };

        assert!(RedisCluster::connect(&config, Duration::from_millis(500))
            .await
            .is_none());
    }
}
