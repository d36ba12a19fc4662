//! Host resource detection
//!
//! Detects the logical CPU count the partitioner works from, plus the
//! host details recorded in manifests and verbose output.

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Number of logical CPUs on this host
///
/// On Linux this counts the `processor` entries in `/proc/cpuinfo`, which is
/// what operators see in `nproc --all`; elsewhere (or if procfs is unreadable)
/// it falls back to `num_cpus`.
pub fn logical_cpus() -> usize {
    #[cfg(target_os = "linux")]
    {
        use procfs::Current;

        match procfs::CpuInfo::current() {
            Ok(info) if info.num_cores() > 0 => return info.num_cores(),
            Ok(_) => tracing::debug!("/proc/cpuinfo lists no processors, using num_cpus"),
            Err(e) => tracing::debug!(error = %e, "cannot read /proc/cpuinfo, using num_cpus"),
        }
    }

    num_cpus::get()
}

/// Host name, or "localhost" if it cannot be determined
pub fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Snapshot of the host a launch runs on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host name
    pub hostname: String,
    /// Logical CPUs used for partitioning
    pub logical_cpus: usize,
    /// Physical cores
    pub physical_cores: usize,
    /// CPU model name
    pub cpu_model: String,
    /// CPU architecture
    pub arch: String,
    /// Total physical memory in bytes
    pub memory_total: u64,
}

impl HostInfo {
    /// Collect host information
    pub fn collect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let cpu_model = sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        HostInfo {
            hostname: host_name(),
            logical_cpus: logical_cpus(),
            physical_cores: num_cpus::get_physical(),
            cpu_model,
            arch: std::env::consts::ARCH.to_string(),
            memory_total: sys.total_memory(),
        }
    }

    /// Print host summary to console
    pub fn print_summary(&self) {
        println!("=== Host ===");
        println!("Hostname:       {}", self.hostname);
        println!("CPU model:      {}", self.cpu_model);
        println!("Logical CPUs:   {}", self.logical_cpus);
        println!("Physical cores: {}", self.physical_cores);
        println!("Architecture:   {}", self.arch);
        println!("Memory:         {}", humansize::format_size(self.memory_total, humansize::BINARY));
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_cpus_detected() {
        assert!(logical_cpus() >= 1);
    }

    #[test]
    fn test_host_info_collect() {
        let info = HostInfo::collect();
        assert!(info.logical_cpus >= 1);
        assert!(!info.hostname.is_empty());
        assert!(!info.cpu_model.is_empty());
    }
}
