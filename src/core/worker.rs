//! Worker specification and spawning
//!
//! A [`WorkerSpec`] carries everything one device's training process
//! needs: rank, CPU range, workspace, command line and the topology
//! variables attached to its environment.

use crate::error::{IoResultExt, LaunchError, Result};
use crate::fs::Workspace;
use crate::system::CpuRange;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Instant;

/// Device count variable
pub const ENV_DEVICE_NUM: &str = "DEVICE_NUM";
/// World size variable
pub const ENV_RANK_SIZE: &str = "RANK_SIZE";
/// Rank table variable
pub const ENV_RANK_TABLE_FILE: &str = "RANK_TABLE_FILE";
/// Legacy rank table variable still read by older communication runtimes
pub const ENV_HCCL_CONFIG_PATH: &str = "MINDSPORE_HCCL_CONFIG_PATH";
/// Per-worker device id variable
pub const ENV_DEVICE_ID: &str = "DEVICE_ID";
/// Per-worker rank id variable
pub const ENV_RANK_ID: &str = "RANK_ID";

/// Topology variables shared by every worker of a launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEnv {
    /// Local device count
    pub device_num: usize,
    /// World size
    pub rank_size: usize,
    /// Resolved rank table
    pub rank_table: PathBuf,
}

impl TopologyEnv {
    /// Single-host topology: the world is exactly the local devices
    pub fn single_host(device_num: usize, rank_table: PathBuf) -> Self {
        Self {
            device_num,
            rank_size: device_num,
            rank_table,
        }
    }

    /// Shared variables, in export order
    pub fn vars(&self) -> Vec<(String, String)> {
        let table = self.rank_table.display().to_string();
        vec![
            (ENV_DEVICE_NUM.to_string(), self.device_num.to_string()),
            (ENV_RANK_SIZE.to_string(), self.rank_size.to_string()),
            (ENV_RANK_TABLE_FILE.to_string(), table.clone()),
            (ENV_HCCL_CONFIG_PATH.to_string(), table),
        ]
    }

    /// Shared variables plus the per-worker device and rank ids
    pub fn worker_vars(&self, device_id: usize, rank_id: usize) -> Vec<(String, String)> {
        let mut vars = self.vars();
        vars.push((ENV_DEVICE_ID.to_string(), device_id.to_string()));
        vars.push((ENV_RANK_ID.to_string(), rank_id.to_string()));
        vars
    }
}

/// Everything needed to start one worker
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Rank id
    pub rank: usize,
    /// Device id
    pub device_id: usize,
    /// CPU range the worker is bound to
    pub cpus: CpuRange,
    /// Apply the CPU range as process affinity
    pub pin: bool,
    /// Working directory
    pub workspace: Workspace,
    /// Program to execute
    pub program: String,
    /// Program arguments (entry script first)
    pub args: Vec<String>,
    /// Variables added to the inherited environment
    pub env: Vec<(String, String)>,
}

impl WorkerSpec {
    /// Printable command line
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// The child's full environment: inherited variables with the
    /// launcher's variables layered on top
    pub fn child_environment(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = std::env::vars_os()
            .map(|(k, v)| (k.to_string_lossy().to_string(), v.to_string_lossy().to_string()))
            .collect();
        for (key, value) in &self.env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    /// Snapshot the child's environment into the workspace
    pub fn write_env_log(&self) -> Result<PathBuf> {
        let env = self.child_environment();
        self.workspace
            .write_env_log(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Build the command, with output redirected to the workspace log
    pub fn command(&self) -> Result<Command> {
        let log_path = self.workspace.log_path();
        let stdout = File::create(&log_path).with_path(&log_path)?;
        let stderr = stdout.try_clone().with_path(&log_path)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.workspace.dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(target_os = "linux")]
        if self.pin {
            use std::os::unix::process::CommandExt;

            let set = self.cpus.cpu_set();
            // SAFETY: the hook only calls sched_setaffinity, which is
            // async-signal-safe.
            unsafe {
                cmd.pre_exec(move || crate::system::affinity::pin_current_process(&set));
            }
        }

        Ok(cmd)
    }

    /// Start the worker
    pub fn spawn(&self) -> Result<WorkerHandle> {
        let mut cmd = self.command()?;
        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            rank: self.rank,
            source,
        })?;

        tracing::info!(
            rank = self.rank,
            device_id = self.device_id,
            pid = child.id(),
            cpus = %self.cpus,
            workspace = %self.workspace.dir.display(),
            "worker started"
        );

        Ok(WorkerHandle {
            rank: self.rank,
            device_id: self.device_id,
            pid: child.id(),
            cpus: self.cpus,
            workspace: self.workspace.clone(),
            child,
            started: Instant::now(),
        })
    }
}

/// A running worker
#[derive(Debug)]
pub struct WorkerHandle {
    /// Rank id
    pub rank: usize,
    /// Device id
    pub device_id: usize,
    /// Process id
    pub pid: u32,
    /// CPU range
    pub cpus: CpuRange,
    /// Working directory
    pub workspace: Workspace,
    /// Child process
    pub child: Child,
    /// Spawn time
    pub started: Instant,
}
