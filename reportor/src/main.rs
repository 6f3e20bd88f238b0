#![warn(
    unused_extern_crates,
    missing_copy_implementations,
    rust_2018_idioms,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::fallible_impl_from,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::dbg_macro
)]
#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use reportor::cli::{parse_args, Arguments, Command};
use reportor::host::HostInfo;
use reportor::identity::{self, HostMachineId};
use reportor::registry::{MemoryRegistry, StreamSnapshot};
use reportor::{trace, LifecycleEvent, Registries, Reportor};
use reportor_env::{initial_setup, read_config, Config, ConfigNotInitialized};
use std::env;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let Arguments {
        json,
        disable_timestamp,
        config_path,
        log_dir,
        cmd,
    } = match parse_args(env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
                clap_err.exit();
            }
            bail!(e);
        }
    };

    let format = if json {
        trace::Format::Json
    } else {
        trace::Format::Raw
    };
    trace::init(
        LevelFilter::DEBUG,
        format,
        !disable_timestamp,
        log_dir.as_deref(),
    )
    .context("Failed to initialize tracing")?;

    let config = match read_config(config_path.clone())? {
        Ok(config) => config,
        Err(ConfigNotInitialized {}) => {
            initial_setup(config_path.clone(), || Ok(Config::default()))?;
            match read_config(config_path)? {
                Ok(config) => config,
                Err(error) => bail!(error),
            }
        }
    };

    match cmd {
        Command::Start => {
            let registries = Registries {
                devices: Arc::new(MemoryRegistry::<serde_json::Value>::new()),
                streams: Arc::new(MemoryRegistry::<StreamSnapshot>::new()),
                system: Arc::new(HostInfo::new()),
            };

            let mut reportor = Reportor::new(registries);
            reportor.on_event(LifecycleEvent::Started).await?;
            reportor
                .on_event(LifecycleEvent::Configured(config))
                .await
                .context("Failed to start reporting")?;

            let Some(handle) = reportor.handle() else {
                bail!("Reporter did not start");
            };

            tokio::select! {
                _ = handle.wait() => bail!("Sync loops stopped unexpectedly"),
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for ctrl-c")?;
                    tracing::info!("Received ctrl-c, shutting down");
                }
            }

            reportor.on_event(LifecycleEvent::Stopped).await?;
        }
        Command::Config => {
            let toml = toml::to_string_pretty(&config).context("Failed to render config")?;
            println!("{}", toml);
        }
        Command::Identity => {
            println!("{}", identity::resolve(&HostMachineId, &config.node.app_id));
        }
    }

    Ok(())
}
