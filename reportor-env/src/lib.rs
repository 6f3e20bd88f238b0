pub mod config;
pub mod defaults;

pub use config::{
    initial_setup, read_config, Cache, CacheMode, Config, ConfigNotInitialized, InvalidSyncSettings,
    ModeUnrecognized, Node, Store, SyncSettings,
};
