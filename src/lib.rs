//! # DistLaunch - One Training Process per Local Device
//!
//! DistLaunch fans a single distributed training invocation out across the
//! accelerator devices of one host. Every device gets its own staged
//! working directory, its own slice of host CPUs and its own copy of the
//! device topology in the child's environment.
//!
//! ## Features
//!
//! - **Isolated Workspaces**: Scripts and asset trees copied per device, in parallel
//! - **CPU Partitioning**: Contiguous, non-overlapping CPU ranges with explicit
//!   handling of hosts that have fewer CPUs than devices
//! - **Explicit Child Environments**: Topology variables are attached per child,
//!   never exported into the launcher's own environment
//! - **Typed Trainer Flags**: Overridable through a JSON launch profile
//! - **Worker Handles**: Detach, join with exit-status collection, or terminate
//! - **Launch Manifest**: `status` and `stop` work on detached launches
//!
//! ## Quick Start
//!
//! ```no_run
//! use distlaunch::config::{CliArgs, LaunchConfig};
//! use distlaunch::core::Launcher;
//! use clap::Parser;
//! use std::path::Path;
//!
//! let args = CliArgs::parse_from(["distlaunch", "/cfg/hccl_8p.json"]);
//! let config = LaunchConfig::from_cli(&args, Path::new("/repo/scripts")).unwrap();
//!
//! let launcher = Launcher::new(config);
//! let launch = launcher.launch().unwrap();
//! launch.print_summary();
//!
//! let report = launch.group.wait_all(launcher.progress());
//! report.print_summary();
//! ```
//!
//! ## Planning Only
//!
//! ```no_run
//! use distlaunch::config::{CliArgs, LaunchConfig};
//! use distlaunch::core::Launcher;
//! use clap::Parser;
//! use std::path::Path;
//!
//! let args = CliArgs::parse_from(["distlaunch", "--cpus", "64", "/cfg/hccl_8p.json"]);
//! let config = LaunchConfig::from_cli(&args, Path::new("/repo/scripts")).unwrap();
//!
//! // Validates the rank table and CPU partition without touching disk
//! Launcher::new(config).plan().unwrap().print();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod progress;
pub mod system;

// Re-export commonly used types
pub use config::{LaunchConfig, TrainerArgs};
pub use core::{Launch, Launcher, WorkerGroup};
pub use error::{LaunchError, Result};
pub use progress::LaunchProgress;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use distlaunch::prelude::*;
    //! ```

    pub use crate::config::{CpuPolicy, LaunchConfig, LaunchProfile, TrainerArgs};
    pub use crate::core::{
        ExitOutcome, GroupReport, Launch, LaunchManifest, LaunchPlan, Launcher, WorkerGroup,
        WorkerSpec,
    };
    pub use crate::error::{LaunchError, Result};
    pub use crate::fs::{AssetPlan, Workspace};
    pub use crate::progress::LaunchProgress;
    pub use crate::system::{partition_cpus, CpuRange, HostInfo, RankTable};
}
