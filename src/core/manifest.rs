//! Launch manifest
//!
//! A JSON record of a launch written next to the workspaces, so later
//! invocations can report on or stop the detached workers.

use crate::config::StopSignal;
use crate::core::WorkerHandle;
use crate::error::{IoResultExt, LaunchError, Result};
use crate::system::CpuRange;
use chrono::{DateTime, Utc};
use console::style;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One started worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Rank id
    pub rank: usize,
    /// Device id
    pub device_id: usize,
    /// Process id
    pub pid: u32,
    /// CPU range the worker was bound to
    pub cpus: CpuRange,
    /// Working directory
    pub workspace: PathBuf,
    /// Trainer log file
    pub log_file: PathBuf,
}

impl From<&WorkerHandle> for WorkerRecord {
    fn from(worker: &WorkerHandle) -> Self {
        Self {
            rank: worker.rank,
            device_id: worker.device_id,
            pid: worker.pid,
            cpus: worker.cpus,
            workspace: worker.workspace.dir.clone(),
            log_file: worker.workspace.log_path(),
        }
    }
}

/// Record of one launch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchManifest {
    /// Manifest version
    pub version: u32,
    /// Launch time
    pub created_at: DateTime<Utc>,
    /// Host the workers run on
    pub hostname: String,
    /// Logical CPUs the partition was computed from
    pub cpus: usize,
    /// Device count
    pub device_num: usize,
    /// Rank table
    pub rank_table: PathBuf,
    /// Trainer command line of rank 0
    pub command: String,
    /// Started workers, ordered by rank
    pub workers: Vec<WorkerRecord>,
}

impl LaunchManifest {
    /// Current manifest version
    pub const VERSION: u32 = 1;

    /// Save manifest to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        tracing::debug!(path = %path.display(), workers = self.workers.len(), "manifest written");
        Ok(())
    }

    /// Load manifest from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let manifest: LaunchManifest = serde_json::from_str(&content)?;
        if manifest.version > Self::VERSION {
            return Err(LaunchError::ManifestError(format!(
                "{} has version {}, newest supported is {}",
                path.display(),
                manifest.version,
                Self::VERSION
            )));
        }
        Ok(manifest)
    }

    /// Send `signal` to every live worker; returns how many were signalled
    pub fn signal_all(&self, signal: StopSignal) -> Result<usize> {
        let mut signalled = 0;
        let mut errors = Vec::new();

        for worker in &self.workers {
            match send_signal(worker.pid, signal) {
                Ok(true) => {
                    tracing::info!(rank = worker.rank, pid = worker.pid, ?signal, "worker signalled");
                    signalled += 1;
                }
                Ok(false) => {
                    tracing::debug!(rank = worker.rank, pid = worker.pid, "worker already gone");
                }
                Err(e) => errors.push(e),
            }
        }

        match errors.len() {
            0 => Ok(signalled),
            1 => Err(errors.remove(0)),
            count => Err(LaunchError::MultipleErrors { count, errors }),
        }
    }

    /// Print status to console
    pub fn print_status(&self) {
        println!("=== Launch Status ===");
        println!("Host:       {}", self.hostname);
        println!(
            "Started:    {} ({} ago)",
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            humantime::format_duration(std::time::Duration::from_secs(
                (Utc::now() - self.created_at).num_seconds().max(0) as u64
            ))
        );
        println!("Rank table: {}", self.rank_table.display());
        println!("CPUs:       {}", self.cpus);
        println!("Command:    {}", self.command);
        println!();

        let mut alive = 0;
        for worker in &self.workers {
            let state = if process_alive(worker.pid) {
                alive += 1;
                style("running").green()
            } else {
                style("exited").dim()
            };
            println!(
                "  rank {:<3} pid {:<8} cpus {:<9} {}  {}",
                worker.rank,
                worker.pid,
                worker.cpus.to_string(),
                state,
                worker.log_file.display()
            );
        }

        println!();
        println!("Running: {}/{}", alive, self.workers.len());
    }
}

/// Check whether `pid` refers to a live process
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Check whether `pid` refers to a live process
#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    let sys = sysinfo::System::new_all();
    sys.process(sysinfo::Pid::from_u32(pid)).is_some()
}

/// Deliver `signal`; `Ok(false)` when the process no longer exists
#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        StopSignal::Term => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(LaunchError::Signal {
            pid,
            message: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: StopSignal) -> Result<bool> {
    let sys = sysinfo::System::new_all();
    match sys.process(sysinfo::Pid::from_u32(pid)) {
        Some(process) => Ok(process.kill()),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rank: usize, pid: u32) -> WorkerRecord {
        WorkerRecord {
            rank,
            device_id: rank,
            pid,
            cpus: CpuRange { start: rank * 8, end: rank * 8 + 7 },
            workspace: PathBuf::from(format!("/repo/scripts/train_parallel{}", rank)),
            log_file: PathBuf::from(format!("/repo/scripts/train_parallel{}/log.txt", rank)),
        }
    }

    fn manifest(workers: Vec<WorkerRecord>) -> LaunchManifest {
        LaunchManifest {
            version: LaunchManifest::VERSION,
            created_at: Utc::now(),
            hostname: "node01".to_string(),
            cpus: 64,
            device_num: 8,
            rank_table: PathBuf::from("/cfg/hccl_8p.json"),
            command: "python train.py".to_string(),
            workers,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.json");

        manifest(vec![record(0, 100), record(1, 101)]).save(&path).unwrap();
        let loaded = LaunchManifest::load(&path).unwrap();

        assert_eq!(loaded.workers.len(), 2);
        assert_eq!(loaded.workers[1], record(1, 101));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"cpus\": \"8-15\""));
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.json");
        let mut m = manifest(vec![]);
        m.version = LaunchManifest::VERSION + 1;
        m.save(&path).unwrap();

        assert!(matches!(LaunchManifest::load(&path), Err(LaunchError::ManifestError(_))));
    }

    #[test]
    fn test_load_garbage_is_manifest_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(LaunchManifest::load(&path), Err(LaunchError::ManifestError(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_liveness_and_stop() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(process_alive(pid));

        let m = manifest(vec![record(0, pid)]);
        assert!(m.workers.iter().all(|w| process_alive(w.pid)));
        assert_eq!(m.signal_all(StopSignal::Term).unwrap(), 1);

        child.wait().unwrap();
        assert!(!process_alive(pid));
        assert_eq!(m.signal_all(StopSignal::Kill).unwrap(), 0);
    }
}
