use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

pub fn parse_args<I, T>(raw_args: I) -> Result<Arguments>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = RawArguments::try_parse_from(raw_args)?;

    let cmd = match args.cmd.unwrap_or(RawCommand::Start) {
        RawCommand::Start => Command::Start,
        RawCommand::Config => Command::Config,
        RawCommand::Identity => Command::Identity,
    };

    Ok(Arguments {
        json: args.json,
        disable_timestamp: args.disable_timestamp,
        config_path: config_path(args.config)?,
        log_dir: args.log_dir,
        cmd,
    })
}

fn config_path(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(config_path) => Ok(config_path),
        None => reportor_fs::default_config_path(),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Arguments {
    pub json: bool,
    pub disable_timestamp: bool,
    pub config_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Config,
    Identity,
}

#[derive(Parser, Debug)]
#[command(
    name = "reportor",
    about = "Publishes device, stream and heartbeat records into shared stores",
    version
)]
pub struct RawArguments {
    #[arg(
        short,
        long = "json",
        help = "Changes the log messages to json vs plain-text. Recommended when running as a service."
    )]
    pub json: bool,

    #[arg(
        short,
        long = "disable-timestamp",
        help = "Disable timestamping of log messages"
    )]
    pub disable_timestamp: bool,

    #[arg(
        long = "config",
        help = "Provide a custom path to the configuration file. The configuration file must be a toml file."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "log-dir",
        help = "Also write JSON logs to reportor.log in this directory"
    )]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Option<RawCommand>,
}

#[derive(Subcommand, Debug)]
pub enum RawCommand {
    #[command(about = "Connect to the configured stores and keep publishing. The default.")]
    Start,
    #[command(about = "Prints the current config")]
    Config,
    #[command(about = "Prints the identity this node publishes under")]
    Identity,
}
