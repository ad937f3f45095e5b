//! Host memory snapshots, pressure levels and size tiers.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

const KIB_PER_GB: f64 = 1024.0 * 1024.0;

/// Share of total RAM assumed available when the kernel does not report
/// `MemAvailable`.
pub const FALLBACK_AVAILABLE_SHARE: f64 = 0.6;

/// Point-in-time view of host memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_gb: f64,
    pub available_gb: f64,
    pub sampled_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

/// Coarse machine class by installed RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemTier {
    Lite,
    Pro,
    Studio,
}

impl MemorySnapshot {
    /// A snapshot for hosts where memory could not be read. Every model
    /// gets the `WontFit` badge until a real sample arrives.
    pub fn unknown(sampled_at: Timestamp) -> Self {
        Self {
            total_gb: 0.0,
            available_gb: 0.0,
            sampled_at,
        }
    }

    pub fn pressure(&self) -> MemoryPressure {
        if self.total_gb <= 0.0 {
            return MemoryPressure::Critical;
        }
        let ratio = self.available_gb / self.total_gb;
        if ratio > 0.4 {
            MemoryPressure::Low
        } else if ratio > 0.25 {
            MemoryPressure::Medium
        } else if ratio > 0.1 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    pub fn tier(&self) -> SystemTier {
        if self.total_gb > 30.0 {
            SystemTier::Studio
        } else if self.total_gb > 10.0 {
            SystemTier::Pro
        } else {
            SystemTier::Lite
        }
    }
}

/// Parse the contents of `/proc/meminfo` into a snapshot.
///
/// Returns `None` when `MemTotal` is absent. A missing `MemAvailable`
/// (kernels before 3.14) falls back to [`FALLBACK_AVAILABLE_SHARE`] of total.
pub fn parse_meminfo(contents: &str, sampled_at: Timestamp) -> Option<MemorySnapshot> {
    let total_kib = meminfo_kib(contents, "MemTotal:")?;
    let available_kib = meminfo_kib(contents, "MemAvailable:")
        .unwrap_or_else(|| (total_kib as f64 * FALLBACK_AVAILABLE_SHARE) as u64);

    Some(MemorySnapshot {
        total_gb: round_gb(total_kib as f64 / KIB_PER_GB),
        available_gb: round_gb(available_kib as f64 / KIB_PER_GB),
        sampled_at,
    })
}

/// Read the host's current memory state. `None` off Linux or when
/// `/proc/meminfo` is unreadable.
pub fn read_system_memory() -> Option<MemorySnapshot> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&contents, chrono::Utc::now())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

// ---- private helpers ----

fn meminfo_kib(contents: &str, key: &str) -> Option<u64> {
    contents.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?;
        rest.trim().strip_suffix("kB")?.trim().parse::<u64>().ok()
    })
}

fn round_gb(gb: f64) -> f64 {
    (gb * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
MemTotal:       32768000 kB
MemFree:         1024000 kB
MemAvailable:   16384000 kB
Buffers:          204800 kB
";

    fn now() -> Timestamp {
        chrono::Utc::now()
    }

    #[test]
    fn parses_total_and_available() {
        let snap = parse_meminfo(SAMPLE, now()).unwrap();
        assert_eq!(snap.total_gb, 31.3);
        assert_eq!(snap.available_gb, 15.6);
    }

    #[test]
    fn missing_available_falls_back_to_share_of_total() {
        let snap = parse_meminfo("MemTotal: 10485760 kB\n", now()).unwrap();
        assert_eq!(snap.total_gb, 10.0);
        assert_eq!(snap.available_gb, 6.0);
    }

    #[test]
    fn missing_total_is_none() {
        assert!(parse_meminfo("MemFree: 100 kB\n", now()).is_none());
        assert!(parse_meminfo("", now()).is_none());
    }

    #[test]
    fn pressure_levels() {
        let snap = |available_gb| MemorySnapshot {
            total_gb: 100.0,
            available_gb,
            sampled_at: now(),
        };
        assert_eq!(snap(50.0).pressure(), MemoryPressure::Low);
        assert_eq!(snap(30.0).pressure(), MemoryPressure::Medium);
        assert_eq!(snap(20.0).pressure(), MemoryPressure::High);
        assert_eq!(snap(5.0).pressure(), MemoryPressure::Critical);
        assert_eq!(MemorySnapshot::unknown(now()).pressure(), MemoryPressure::Critical);
    }

    #[test]
    fn tiers_by_total() {
        let snap = |total_gb| MemorySnapshot {
            total_gb,
            available_gb: 1.0,
            sampled_at: now(),
        };
        assert_eq!(snap(8.0).tier(), SystemTier::Lite);
        assert_eq!(snap(16.0).tier(), SystemTier::Pro);
        assert_eq!(snap(64.0).tier(), SystemTier::Studio);
    }
}
