//! Launch orchestration
//!
//! Plans one worker per device, stages every workspace, then starts the
//! workers. A launch either starts all of its workers or none of them.

use crate::config::LaunchConfig;
use crate::core::{LaunchManifest, TopologyEnv, WorkerGroup, WorkerRecord, WorkerSpec};
use crate::error::{collect_errors, IoResultExt, LaunchError, Result};
use crate::fs::{AssetPlan, StageStats, Workspace};
use crate::progress::LaunchProgress;
use crate::system::{host_name, logical_cpus, partition_cpus, RankTable};
use chrono::Utc;
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Everything decided before the filesystem is touched
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    /// Located rank table
    pub rank_table: RankTable,
    /// Logical CPUs the partition was computed from
    pub cpus: usize,
    /// Shared topology variables
    pub topology: TopologyEnv,
    /// One entry per device, ordered by rank
    pub workers: Vec<WorkerSpec>,
}

impl LaunchPlan {
    /// Print the plan to console
    pub fn print(&self) {
        println!("=== Launch Plan ===");
        println!("Rank table: {}", self.rank_table.path.display());
        println!("Devices:    {}", self.topology.device_num);
        println!("CPUs:       {}", self.cpus);

        for worker in &self.workers {
            println!();
            println!("[rank {}] device {}", worker.rank, worker.device_id);
            println!("  workspace: {}", worker.workspace.dir.display());
            if worker.pin {
                println!("  cpus:      {}", worker.cpus);
            } else {
                println!("  cpus:      {} (not pinned)", worker.cpus);
            }
            println!("  command:   {}", worker.command_line());
            for (key, value) in &worker.env {
                println!("  env:       {}={}", key, value);
            }
        }
    }
}

/// Result of a successful launch
#[derive(Debug)]
pub struct Launch {
    /// Running workers
    pub group: WorkerGroup,
    /// Record written next to the workspaces
    pub manifest: LaunchManifest,
    /// Staging statistics across all workspaces
    pub staged: StageStats,
    /// Time spent staging and spawning
    pub duration: Duration,
}

impl Launch {
    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Launch Summary ===");
        println!("Workers started: {}", self.group.len());
        println!("Files staged:    {}", self.staged.files);
        println!(
            "Bytes staged:    {}",
            humansize::format_size(self.staged.bytes, humansize::BINARY)
        );
        println!("Duration:        {:.2?}", self.duration);
        println!();
        for worker in &self.manifest.workers {
            println!(
                "  rank {:<3} pid {:<8} cpus {:<9} {}",
                worker.rank,
                worker.pid,
                worker.cpus.to_string(),
                worker.log_file.display()
            );
        }
    }
}

/// Starts one trainer per device
pub struct Launcher {
    /// Configuration
    config: LaunchConfig,
    /// Progress reporter
    progress: LaunchProgress,
}

impl Launcher {
    /// Create a new launcher
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            progress: LaunchProgress::disabled(),
        }
    }

    /// Set progress reporter
    pub fn with_progress(mut self, progress: LaunchProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Configuration
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Progress reporter
    pub fn progress(&self) -> &LaunchProgress {
        &self.progress
    }

    /// Validate the host and build one worker spec per device
    ///
    /// Nothing on disk is created or modified.
    pub fn plan(&self) -> Result<LaunchPlan> {
        let config = &self.config;

        let rank_table = RankTable::locate(&config.paths.rank_table)?;
        rank_table.check_device_count(config.device_num);

        let cpus = config.cpus.unwrap_or_else(logical_cpus);
        let ranges = partition_cpus(cpus, config.device_num, config.cpu_policy)?;

        let topology = TopologyEnv::single_host(config.device_num, rank_table.path.clone());

        let mut args = vec![config.script.clone()];
        args.extend(config.trainer.to_args());

        let workers = ranges
            .into_iter()
            .enumerate()
            .map(|(i, cpus)| WorkerSpec {
                rank: i,
                device_id: i,
                cpus,
                pin: config.pin_cpus,
                workspace: Workspace::new(i, config.workspace_dir(i)),
                program: config.program.clone(),
                args: args.clone(),
                env: topology.worker_vars(i, i),
            })
            .collect();

        tracing::debug!(cpus, devices = config.device_num, "launch planned");

        Ok(LaunchPlan {
            rank_table,
            cpus,
            topology,
            workers,
        })
    }

    /// Stage every workspace and start every worker
    pub fn launch(&self) -> Result<Launch> {
        let start_time = Instant::now();
        let plan = self.plan()?;
        let assets = AssetPlan::new(&self.config.source_root, &self.config.assets)
            .map_err(|e| {
                e.with_context(format!(
                    "resolving assets under {}",
                    self.config.source_root.display()
                ))
            })?
            .with_excluded(
                plan.workers
                    .iter()
                    .map(|w| w.workspace.dir.clone())
                    .chain(std::iter::once(self.config.manifest_path())),
            );

        std::fs::create_dir_all(&self.config.work_root).with_path(&self.config.work_root)?;

        let staged = match self.stage(&plan, &assets) {
            Ok(staged) => staged,
            Err(e) => {
                self.progress.abandon("staging failed");
                return Err(e);
            }
        };

        let group = self.spawn(&plan)?;

        let manifest = LaunchManifest {
            version: LaunchManifest::VERSION,
            created_at: Utc::now(),
            hostname: host_name(),
            cpus: plan.cpus,
            device_num: self.config.device_num,
            rank_table: plan.rank_table.path.clone(),
            command: plan
                .workers
                .first()
                .map(WorkerSpec::command_line)
                .unwrap_or_default(),
            workers: group.workers().iter().map(WorkerRecord::from).collect(),
        };

        let manifest_path = self.config.manifest_path();
        if let Err(e) = manifest.save(&manifest_path) {
            // Workers are already running
            tracing::warn!(path = %manifest_path.display(), error = %e, "failed to write launch manifest");
        }

        let duration = start_time.elapsed();
        tracing::info!(
            workers = group.len(),
            bytes = staged.bytes,
            duration = ?duration,
            "launch complete"
        );

        Ok(Launch {
            group,
            manifest,
            staged,
            duration,
        })
    }

    /// Stage all workspaces in parallel and write their environment logs
    fn stage(&self, plan: &LaunchPlan, assets: &AssetPlan) -> Result<StageStats> {
        self.progress.begin_staging(plan.workers.len() as u64);

        let results: Vec<Result<StageStats>> = plan
            .workers
            .par_iter()
            .map(|worker| {
                let stats = worker
                    .workspace
                    .prepare(assets)
                    .and_then(|stats| worker.write_env_log().map(|_| stats))
                    .map_err(|e| LaunchError::staging(worker.rank, e))?;
                self.progress.workspace_staged(&stats);
                Ok(stats)
            })
            .collect();

        let per_workspace = collect_errors(results)?;
        self.progress.finish_staging();

        let mut total = StageStats::default();
        for stats in &per_workspace {
            total.merge(stats);
        }
        Ok(total)
    }

    /// Start workers in rank order; on failure stop the ones already started
    fn spawn(&self, plan: &LaunchPlan) -> Result<WorkerGroup> {
        self.progress.begin_spawn(plan.workers.len() as u64);
        let mut group = WorkerGroup::new();

        for worker in &plan.workers {
            match worker.spawn() {
                Ok(handle) => {
                    self.progress.worker_started(handle.rank, handle.pid);
                    group.push(handle);
                }
                Err(e) => {
                    tracing::error!(
                        rank = worker.rank,
                        started = group.len(),
                        error = %e,
                        "spawn failed, stopping started workers"
                    );
                    self.progress.abandon("spawn failed");
                    group.terminate();
                    return Err(e);
                }
            }
        }

        self.progress.finish_spawn();
        Ok(group)
    }
}
