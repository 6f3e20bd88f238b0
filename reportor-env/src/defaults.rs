//! Defaults shared by the configuration file and the command line.

pub const APP_ID: &str = "monibuca";
pub const OWNER_PREFIX: &str = "m7s";

pub const CACHE_MODE: &str = "node";
pub const CACHE_POOL_SIZE: u32 = 100;

pub const STORE_DIAL_TIMEOUT_SECS: u64 = 10;

pub const SYNC_INTERVAL_SECS: u64 = 30;
pub const SYNC_SERVICE_INTERVAL_SECS: u64 = 30;
pub const SYNC_TTL_SECS: u64 = 180;
pub const WRITE_TIMEOUT_SECS: u64 = 30;
pub const PROBE_TIMEOUT_MS: u64 = 1000;
