//! Configuration settings for DistLaunch
//!
//! Defines the CLI surface, path resolution, launch profiles and the
//! runtime configuration handed to the launcher.

use crate::config::TrainerArgs;
use crate::error::{IoResultExt, LaunchError, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Number of local accelerator devices driven by one launch
pub const DEVICE_NUM: usize = 8;

/// Default model configuration, relative to the source root
pub const DEFAULT_CONFIG: &str = "config/network_yolov7/yolov7.yaml";

/// Default dataset descriptor, relative to the source root
pub const DEFAULT_DATA: &str = "config/data/coco.yaml";

/// Default hyperparameter descriptor, relative to the source root
pub const DEFAULT_HYP: &str = "config/data/hyp.scratch.p5.yaml";

/// Manifest file written next to the workspaces
pub const MANIFEST_FILE: &str = "launch.json";

/// Usage text printed on a bad argument count
pub const USAGE: &str = "\
Usage: distlaunch [OPTIONS] [CONFIG_PATH DATA_PATH HYP_PATH] RANK_TABLE_FILE
       distlaunch status [--manifest PATH]
       distlaunch stop [--manifest PATH] [--signal term|kill]
       distlaunch --help for more information";

/// DistLaunch - one training process per local accelerator device
#[derive(Parser, Debug, Clone)]
#[command(name = "distlaunch")]
#[command(author = "DistLaunch Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fan a distributed training job out across local devices")]
#[command(long_about = r#"
DistLaunch starts one training process per local accelerator device.

For every device it:
  - stages an isolated train_parallel<N> working directory
  - exports the device topology (DEVICE_NUM, RANK_SIZE, RANK_TABLE_FILE,
    DEVICE_ID, RANK_ID) to the child
  - pins the child to its own slice of host CPUs

Examples:
  distlaunch /path/hccl_8p.json                          # default config/data/hyp
  distlaunch cfg.yaml coco.yaml hyp.yaml hccl_8p.json    # explicit paths
  distlaunch --wait /path/hccl_8p.json                   # join workers, report exits
  distlaunch status                                      # check a running launch
"#)]
#[command(args_conflicts_with_subcommands = true)]
pub struct CliArgs {
    /// [CONFIG_PATH DATA_PATH HYP_PATH] RANK_TABLE_FILE
    #[arg(value_name = "PATHS")]
    pub paths: Vec<String>,

    /// Repository root that assets and default paths are taken from
    #[arg(long, value_name = "DIR", default_value = "..")]
    pub source_root: String,

    /// Directory in which the per-device workspaces are created
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub work_root: String,

    /// Trainer program
    #[arg(long, value_name = "PROGRAM", default_value = "python", env = "DISTLAUNCH_PROGRAM")]
    pub program: String,

    /// Trainer entry script, relative to the workspace
    #[arg(long, value_name = "FILE", default_value = "train.py")]
    pub script: String,

    /// Override the detected logical CPU count
    #[arg(long, value_name = "NUM")]
    pub cpus: Option<usize>,

    /// What to do when there are fewer CPUs than devices
    #[arg(long, value_enum, default_value = "reject")]
    pub cpu_policy: CpuPolicy,

    /// Do not pin workers to CPU ranges
    #[arg(long)]
    pub no_pin: bool,

    /// JSON launch profile overriding trainer flags and staged assets
    #[arg(long, value_name = "PATH")]
    pub profile: Option<PathBuf>,

    /// Wait for every worker and report exit statuses
    #[arg(short = 'w', long)]
    pub wait: bool,

    /// Print the launch plan without touching the filesystem
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Emit log events as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show liveness of the workers recorded in a launch manifest
    #[command(name = "status")]
    Status {
        /// Manifest file path
        #[arg(long, default_value = MANIFEST_FILE)]
        manifest: PathBuf,
    },

    /// Signal every live worker recorded in a launch manifest
    #[command(name = "stop")]
    Stop {
        /// Manifest file path
        #[arg(long, default_value = MANIFEST_FILE)]
        manifest: PathBuf,
        /// Signal to send
        #[arg(long, value_enum, default_value = "term")]
        signal: StopSignal,
    },
}

/// Handling of hosts with fewer logical CPUs than devices
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CpuPolicy {
    /// Refuse to launch
    #[default]
    Reject,
    /// Give each device one core, shared round-robin
    Clamp,
}

/// Signal sent by `stop`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopSignal {
    /// SIGTERM
    #[default]
    Term,
    /// SIGKILL
    Kill,
}

/// Files and directories copied into every workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSpec {
    /// Glob patterns for top-level files of the source root
    pub files: Vec<String>,
    /// Directory trees under the source root
    pub dirs: Vec<String>,
    /// Workspace directory prefix; the device index is appended
    pub workspace_prefix: String,
}

impl Default for AssetSpec {
    fn default() -> Self {
        Self {
            files: vec!["*.py".to_string()],
            dirs: ["config", "network", "utils", "scripts"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            workspace_prefix: "train_parallel".to_string(),
        }
    }
}

/// Optional JSON overrides for a launch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchProfile {
    /// Trainer flag overrides
    pub trainer: TrainerArgs,
    /// Asset overrides
    pub assets: AssetSpec,
}

impl LaunchProfile {
    /// Load a profile from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        serde_json::from_str(&content)
            .map_err(|e| LaunchError::config(format!("invalid profile {}: {}", path.display(), e)))
    }
}

/// The four resolved descriptor paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPaths {
    /// Model configuration
    pub config: PathBuf,
    /// Dataset descriptor
    pub data: PathBuf,
    /// Hyperparameter descriptor
    pub hyp: PathBuf,
    /// Rank table (device topology descriptor)
    pub rank_table: PathBuf,
}

impl LaunchPaths {
    /// Resolve positional arguments against `cwd`
    ///
    /// One argument names the rank table and takes the default descriptors
    /// from `source_root`; four arguments name all paths in order.
    pub fn from_args(args: &[String], cwd: &Path, source_root: &Path) -> Result<Self> {
        match args {
            [rank_table] => Ok(Self {
                config: source_root.join(DEFAULT_CONFIG),
                data: source_root.join(DEFAULT_DATA),
                hyp: source_root.join(DEFAULT_HYP),
                rank_table: resolve_path(rank_table, cwd),
            }),
            [config, data, hyp, rank_table] => Ok(Self {
                config: resolve_path(config, cwd),
                data: resolve_path(data, cwd),
                hyp: resolve_path(hyp, cwd),
                rank_table: resolve_path(rank_table, cwd),
            }),
            _ => Err(LaunchError::Usage(args.len())),
        }
    }
}

/// Absolute form of `path`
///
/// Paths starting with `/` are returned verbatim. Anything else is joined to
/// `cwd` and resolved the way `realpath -m` does it; the target does not need
/// to exist.
pub fn resolve_path(path: &str, cwd: &Path) -> PathBuf {
    if path.starts_with('/') {
        return PathBuf::from(path);
    }
    real_path(&cwd.join(path))
}

/// Resolve `path` component by component
///
/// Components that exist are canonicalised, so a later `..` applies to a
/// symlink's target rather than to the link. Components that do not exist
/// are appended as written.
fn real_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => {
                out.push(name);
                if let Ok(real) = std::fs::canonicalize(&out) {
                    out = real;
                } else if let Ok(target) = std::fs::read_link(&out) {
                    // Dangling symlink: follow it to where it would point
                    out.pop();
                    out = normalize_path(&out.join(target));
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

/// Collapse `.` and `..` components without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // ".." at the root stays at the root
                if !matches!(out.components().next_back(), None | Some(Component::RootDir)) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Resolved descriptor paths
    pub paths: LaunchPaths,
    /// Repository root assets are copied from
    pub source_root: PathBuf,
    /// Parent directory of the workspaces
    pub work_root: PathBuf,
    /// Device count (also the rank size)
    pub device_num: usize,
    /// Trainer program
    pub program: String,
    /// Trainer entry script
    pub script: String,
    /// CPU count override
    pub cpus: Option<usize>,
    /// Degenerate partition handling
    pub cpu_policy: CpuPolicy,
    /// Pin workers to their CPU ranges
    pub pin_cpus: bool,
    /// Trainer flags, with descriptor paths filled in
    pub trainer: TrainerArgs,
    /// Staged assets
    pub assets: AssetSpec,
    /// Join workers before exiting
    pub wait: bool,
    /// Plan only
    pub dry_run: bool,
}

impl LaunchConfig {
    /// Create config from CLI arguments, resolving relative paths against `cwd`
    pub fn from_cli(args: &CliArgs, cwd: &Path) -> Result<Self> {
        let source_root = resolve_path(&args.source_root, cwd);
        let work_root = resolve_path(&args.work_root, cwd);
        let paths = LaunchPaths::from_args(&args.paths, cwd, &source_root)?;

        let profile = match &args.profile {
            Some(path) => {
                let path = resolve_path(&path.to_string_lossy(), cwd);
                LaunchProfile::load(&path)?
            }
            None => LaunchProfile::default(),
        };

        if profile.assets.workspace_prefix.is_empty() {
            return Err(LaunchError::config("workspace_prefix must not be empty"));
        }
        if args.cpus == Some(0) {
            return Err(LaunchError::config("--cpus must be at least 1"));
        }

        let trainer = profile
            .trainer
            .with_paths(paths.config.clone(), paths.data.clone(), paths.hyp.clone());

        Ok(Self {
            paths,
            source_root,
            work_root,
            device_num: DEVICE_NUM,
            program: args.program.clone(),
            script: args.script.clone(),
            cpus: args.cpus,
            cpu_policy: args.cpu_policy,
            pin_cpus: !args.no_pin,
            trainer,
            assets: profile.assets,
            wait: args.wait,
            dry_run: args.dry_run,
        })
    }

    /// Workspace directory for a device index
    pub fn workspace_dir(&self, index: usize) -> PathBuf {
        self.work_root
            .join(format!("{}{}", self.assets.workspace_prefix, index))
    }

    /// Path of the launch manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.work_root.join(MANIFEST_FILE)
    }
}
