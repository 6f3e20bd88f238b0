use crate::registry::SystemInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, PoisonError};
use sysinfo::System;

/// Heartbeat payload reported by [`HostInfo`].
#[derive(Clone, Debug, Serialize)]
pub struct HostSnapshot {
    pub local_ip: String,
    pub os: &'static str,
    pub arch: &'static str,
    pub pid: u32,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub load: LoadAverage,
    /// Averaged over all cores since the previous snapshot.
    pub cpu_usage_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

/// Run queue length averaged over 1, 5 and 15 minutes. Zero on Windows.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// System information for a standalone sidecar.
#[derive(Debug)]
pub struct HostInfo {
    started_at: DateTime<Utc>,
    system: Mutex<System>,
}

impl HostInfo {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta, the first refresh only sets the baseline.
        system.refresh_cpu_usage();

        Self {
            started_at: Utc::now(),
            system: Mutex::new(system),
        }
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemInfo for HostInfo {
    type Info = HostSnapshot;

    fn snapshot(&self) -> HostSnapshot {
        let (cpu_usage_percent, memory_used_bytes, memory_total_bytes) = {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu_usage = system.global_cpu_usage();
            (
                if cpu_usage.is_finite() { cpu_usage } else { 0.0 },
                system.used_memory(),
                system.total_memory(),
            )
        };
        let load = System::load_average();

        HostSnapshot {
            local_ip: self.local_ip(),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION"),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            load: LoadAverage {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
            },
            cpu_usage_percent,
            memory_used_bytes,
            memory_total_bytes,
        }
    }

    fn local_ip(&self) -> String {
        local_ip_address::local_ip()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ip_is_parseable() {
        let ip = HostInfo::new().local_ip();

        assert!(ip.parse::<IpAddr>().is_ok());
    }

    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_value(HostInfo::new().snapshot()).unwrap();

        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert!(json["uptime_secs"].as_i64().unwrap() >= 0);
    }

    #[test]
    fn snapshot_carries_load_and_memory() {
        let json = serde_json::to_value(HostInfo::new().snapshot()).unwrap();

        for window in ["one", "five", "fifteen"] {
            assert!(json["load"][window].as_f64().unwrap() >= 0.0, "{}", window);
        }
        assert!(json["cpu_usage_percent"].as_f64().unwrap() >= 0.0);
        let used = json["memory_used_bytes"].as_u64().unwrap();
        let total = json["memory_total_bytes"].as_u64().unwrap();
        assert!(total > 0);
        assert!(used <= total);
    }
}
