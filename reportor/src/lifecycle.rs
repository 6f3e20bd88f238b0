use crate::identity::NodeIdentity;
use crate::registry::{DeviceRegistry, StreamRegistry, SystemInfo};
use crate::sync::{self, Registries, ServiceHandle, StartError};
use reportor_env::Config;

/// Events the host application forwards to the reporter.
#[derive(Clone, Debug)]
pub enum LifecycleEvent {
    Configured(Config),
    Started,
    Stopped,
}

/// Starts reporting on the first configuration and owns the running loops.
pub struct Reportor<D, S, I> {
    registries: Registries<D, S, I>,
    handle: Option<ServiceHandle>,
}

impl<D, S, I> Reportor<D, S, I>
where
    D: DeviceRegistry,
    S: StreamRegistry,
    I: SystemInfo,
{
    pub fn new(registries: Registries<D, S, I>) -> Self {
        Self {
            registries,
            handle: None,
        }
    }

    pub async fn on_event(&mut self, event: LifecycleEvent) -> Result<(), StartError> {
        match event {
            LifecycleEvent::Configured(config) => {
                if let Some(handle) = &self.handle {
                    tracing::warn!(node_id = %handle.node(), "Ignoring configuration, reporter is already running");
                    return Err(StartError::AlreadyStarted(handle.node().clone()));
                }

                let handle = sync::start(&config, self.registries.clone()).await?;
                self.handle = Some(handle);
            }
            LifecycleEvent::Started => tracing::debug!("Host started"),
            LifecycleEvent::Stopped => tracing::debug!("Host stopped"),
        }

        Ok(())
    }

    pub fn node(&self) -> Option<&NodeIdentity> {
        self.handle.as_ref().map(ServiceHandle::node)
    }

    pub fn handle(&mut self) -> Option<&mut ServiceHandle> {
        self.handle.as_mut()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostInfo;
    use crate::registry::{MemoryRegistry, StreamSnapshot};
    use reportor_env::{Cache, InvalidSyncSettings, SyncSettings};
    use std::sync::Arc;

    type TestReportor = Reportor<MemoryRegistry<u32>, MemoryRegistry<StreamSnapshot>, HostInfo>;

    fn reportor() -> TestReportor {
        Reportor::new(Registries {
            devices: Arc::new(MemoryRegistry::new()),
            streams: Arc::new(MemoryRegistry::new()),
            system: Arc::new(HostInfo::new()),
        })
    }

    #[tokio::test]
    async fn first_configuration_starts_reporting() {
        let mut reportor = reportor();
        assert!(!reportor.is_running());

        reportor
            .on_event(LifecycleEvent::Configured(Config::default()))
            .await
            .unwrap();

        assert!(reportor.is_running());
        assert!(reportor.node().is_some());
    }

    #[tokio::test]
    async fn second_configuration_is_ignored() {
        let mut reportor = reportor();
        reportor
            .on_event(LifecycleEvent::Configured(Config::default()))
            .await
            .unwrap();
        let node = reportor.node().cloned().unwrap();

        let error = reportor
            .on_event(LifecycleEvent::Configured(Config::default()))
            .await
            .unwrap_err();

        assert_eq!(error, StartError::AlreadyStarted(node.clone()));
        assert_eq!(reportor.node(), Some(&node));
    }

    #[tokio::test]
    async fn other_events_do_nothing() {
        let mut reportor = reportor();

        reportor.on_event(LifecycleEvent::Started).await.unwrap();
        reportor.on_event(LifecycleEvent::Stopped).await.unwrap();

        assert!(!reportor.is_running());
    }

    #[tokio::test]
    async fn unknown_cache_mode_does_not_start() {
        let mut reportor = reportor();
        let config = Config {
            cache: Cache {
                hosts: vec!["127.0.0.1:6379".to_owned()],
                mode: "sentinel".to_owned(),
                ..Cache::default()
            },
            ..Config::default()
        };

        let error = reportor
            .on_event(LifecycleEvent::Configured(config))
            .await
            .unwrap_err();

        assert!(matches!(error, StartError::ModeUnrecognized(_)));
        assert!(!reportor.is_running());
    }

    #[tokio::test]
    async fn zero_interval_does_not_start() {
        let mut reportor = reportor();
        let config = Config {
            sync: SyncSettings {
                interval_secs: 0,
                ..SyncSettings::default()
            },
            ..Config::default()
        };

        let error = reportor
            .on_event(LifecycleEvent::Configured(config))
            .await
            .unwrap_err();

        assert_eq!(
            error,
            StartError::InvalidSettings(InvalidSyncSettings {
                field: "interval_secs"
            })
        );
        assert!(!reportor.is_running());
    }
}
