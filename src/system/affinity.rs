//! CPU-range partitioning and process affinity
//!
//! Each device gets a contiguous, equally sized slice of the host's logical
//! CPUs. Leftover cores (`cpus % devices`) are not handed out.

use crate::config::CpuPolicy;
use crate::error::{LaunchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inclusive range of logical CPU indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CpuRange {
    /// First CPU
    pub start: usize,
    /// Last CPU (inclusive)
    pub end: usize,
}

impl CpuRange {
    /// Create a range; `end` must not be below `start`
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if end < start {
            return Err(LaunchError::config(format!("invalid CPU range {}-{}", start, end)));
        }
        Ok(Self { start, end })
    }

    /// Number of CPUs in the range
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Always false; a range holds at least one CPU
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `cpu` falls inside the range
    pub fn contains(&self, cpu: usize) -> bool {
        (self.start..=self.end).contains(&cpu)
    }

    /// Iterate the CPU indices
    pub fn cpus(&self) -> impl Iterator<Item = usize> {
        self.start..=self.end
    }

    /// Build the kernel affinity mask for this range
    #[cfg(target_os = "linux")]
    pub fn cpu_set(&self) -> libc::cpu_set_t {
        use std::mem::MaybeUninit;

        // Indices past CPU_SETSIZE cannot be expressed in a cpu_set_t
        let limit = libc::CPU_SETSIZE as usize;

        unsafe {
            let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed().assume_init();
            libc::CPU_ZERO(&mut set);
            for cpu in self.cpus().take_while(|&c| c < limit) {
                libc::CPU_SET(cpu, &mut set);
            }
            set
        }
    }
}

impl fmt::Display for CpuRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for CpuRange {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let parsed = match s.split_once('-') {
            Some((start, end)) => start.parse::<usize>().ok().zip(end.parse::<usize>().ok()),
            None => s.parse::<usize>().ok().map(|cpu| (cpu, cpu)),
        };

        match parsed {
            Some((start, end)) => Self::new(start, end),
            None => Err(LaunchError::config(format!("invalid CPU range '{}'", s))),
        }
    }
}

impl TryFrom<String> for CpuRange {
    type Error = LaunchError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CpuRange> for String {
    fn from(range: CpuRange) -> Self {
        range.to_string()
    }
}

/// Split `cpus` logical CPUs across `devices` devices
///
/// Device `i` receives `[i*avg, i*avg + avg - 1]` with `avg = cpus / devices`.
/// When `cpus < devices` there is no whole slice to give out: `Reject`
/// fails, `Clamp` pins device `i` to the single core `i % cpus`.
pub fn partition_cpus(cpus: usize, devices: usize, policy: CpuPolicy) -> Result<Vec<CpuRange>> {
    if devices == 0 {
        return Err(LaunchError::config("device count must be at least 1"));
    }
    if cpus == 0 {
        return Err(LaunchError::config("CPU count must be at least 1"));
    }

    let avg = cpus / devices;

    if avg == 0 {
        return match policy {
            CpuPolicy::Reject => Err(LaunchError::InsufficientCpus { cpus, devices }),
            CpuPolicy::Clamp => {
                tracing::warn!(cpus, devices, "fewer CPUs than devices, sharing cores round-robin");
                Ok((0..devices)
                    .map(|i| {
                        let cpu = i % cpus;
                        CpuRange { start: cpu, end: cpu }
                    })
                    .collect())
            }
        };
    }

    let gap = avg - 1;
    let spare = cpus % devices;
    if spare > 0 {
        tracing::debug!(spare, "CPUs left unassigned by partitioning");
    }

    Ok((0..devices)
        .map(|i| {
            let start = i * avg;
            CpuRange { start, end: start + gap }
        })
        .collect())
}

/// Pin the calling process to `set`
///
/// Only async-signal-safe calls are made, so this may run between fork and
/// exec.
#[cfg(target_os = "linux")]
pub fn pin_current_process(set: &libc::cpu_set_t) -> std::io::Result<()> {
    let result = unsafe {
        libc::sched_setaffinity(
            0, // calling process
            std::mem::size_of::<libc::cpu_set_t>(),
            set,
        )
    };

    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_64_cpus() {
        let ranges = partition_cpus(64, 8, CpuPolicy::Reject).unwrap();
        assert_eq!(ranges.len(), 8);
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.to_string(), format!("{}-{}", 8 * i, 8 * i + 7));
        }
        assert_eq!(ranges[3].to_string(), "24-31");
    }

    #[test]
    fn test_remainder_cores_unassigned() {
        let ranges = partition_cpus(20, 8, CpuPolicy::Reject).unwrap();
        assert!(ranges.iter().all(|r| r.len() == 2));
        assert_eq!(ranges[7].to_string(), "14-15");
        assert!(!ranges.iter().any(|r| r.contains(16)));
    }

    #[test]
    fn test_too_few_cpus_rejected() {
        match partition_cpus(4, 8, CpuPolicy::Reject) {
            Err(LaunchError::InsufficientCpus { cpus, devices }) => {
                assert_eq!((cpus, devices), (4, 8));
            }
            other => panic!("expected InsufficientCpus, got {:?}", other),
        }
    }

    #[test]
    fn test_too_few_cpus_clamped() {
        let ranges = partition_cpus(4, 8, CpuPolicy::Clamp).unwrap();
        let rendered: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
        assert_eq!(rendered, vec!["0-0", "1-1", "2-2", "3-3", "0-0", "1-1", "2-2", "3-3"]);
        assert!(rendered.iter().all(|r| !r.contains("--")));
    }

    #[test]
    fn test_zero_inputs() {
        assert!(partition_cpus(8, 0, CpuPolicy::Clamp).is_err());
        assert!(partition_cpus(0, 8, CpuPolicy::Clamp).is_err());
    }

    #[test]
    fn test_range_parsing() {
        assert_eq!("24-31".parse::<CpuRange>().unwrap(), CpuRange { start: 24, end: 31 });
        assert_eq!("5".parse::<CpuRange>().unwrap(), CpuRange { start: 5, end: 5 });
        assert!("3--1".parse::<CpuRange>().is_err());
        assert!("7-3".parse::<CpuRange>().is_err());
        assert!("a-b".parse::<CpuRange>().is_err());
    }

    #[test]
    fn test_range_serializes_as_string() {
        let range = CpuRange { start: 8, end: 15 };
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, "\"8-15\"");
        let back: CpuRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, range);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_cpu_set_contents() {
        let set = CpuRange { start: 2, end: 4 }.cpu_set();
        unsafe {
            assert!(!libc::CPU_ISSET(1, &set));
            assert!(libc::CPU_ISSET(2, &set));
            assert!(libc::CPU_ISSET(4, &set));
            assert!(!libc::CPU_ISSET(5, &set));
        }
    }

    proptest! {
        #[test]
        fn prop_even_partition_is_disjoint_and_in_bounds(devices in 1usize..16, extra in 0usize..512) {
            let cpus = devices + extra;
            let ranges = partition_cpus(cpus, devices, CpuPolicy::Reject).unwrap();
            let avg = cpus / devices;

            prop_assert_eq!(ranges.len(), devices);
            for (i, range) in ranges.iter().enumerate() {
                prop_assert_eq!(range.start, i * avg);
                prop_assert_eq!(range.len(), avg);
                prop_assert!(range.end < cpus);
                if i > 0 {
                    prop_assert_eq!(ranges[i - 1].end + 1, range.start);
                }
            }
        }

        #[test]
        fn prop_clamped_ranges_are_valid(cpus in 1usize..64, devices in 1usize..64) {
            let ranges = partition_cpus(cpus, devices, CpuPolicy::Clamp).unwrap();
            prop_assert_eq!(ranges.len(), devices);
            for range in &ranges {
                prop_assert!(range.start <= range.end);
                prop_assert!(range.end < cpus);
            }
        }
    }
}
