//! Launch progress reporter
//!
//! Uses indicatif for:
//! - Workspace staging progress
//! - Worker spawn progress
//! - A spinner while joined workers run

use crate::core::ExitOutcome;
use crate::fs::StageStats;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Progress reporter for a launch
pub struct LaunchProgress {
    /// Multi-progress container
    multi: MultiProgress,
    /// Workspaces staged
    staging_bar: ProgressBar,
    /// Workers started
    spawn_bar: ProgressBar,
    /// Status line / wait spinner
    status: ProgressBar,
    /// Start time
    start_time: Instant,
    /// Bytes staged across workspaces
    bytes_staged: AtomicU64,
    /// Workers finished while waiting
    finished: AtomicU64,
    /// Is progress enabled
    enabled: AtomicBool,
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl LaunchProgress {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let staging_bar = multi.add(ProgressBar::new(0));
        staging_bar.set_style(bar_style(
            "{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} workspaces {msg}",
        ));
        staging_bar.set_prefix("Stage");

        let spawn_bar = multi.add(ProgressBar::new(0));
        spawn_bar.set_style(bar_style(
            "{prefix:.bold.dim} [{bar:40.green/white}] {pos}/{len} workers",
        ));
        spawn_bar.set_prefix("Spawn");

        Self {
            multi,
            staging_bar,
            spawn_bar,
            status,
            start_time: Instant::now(),
            bytes_staged: AtomicU64::new(0),
            finished: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a disabled progress reporter (for quiet mode)
    pub fn disabled() -> Self {
        let reporter = Self::new();
        reporter.enabled.store(false, Ordering::SeqCst);
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Start the staging phase
    pub fn begin_staging(&self, workspaces: u64) {
        self.staging_bar.set_length(workspaces);
        self.status.set_message("staging workspaces");
    }

    /// Record one staged workspace
    pub fn workspace_staged(&self, stats: &StageStats) {
        let total = self.bytes_staged.fetch_add(stats.bytes, Ordering::Relaxed) + stats.bytes;
        self.staging_bar
            .set_message(humansize::format_size(total, humansize::BINARY));
        self.staging_bar.inc(1);
    }

    /// End the staging phase
    pub fn finish_staging(&self) {
        self.staging_bar.finish();
    }

    /// Start the spawn phase
    pub fn begin_spawn(&self, workers: u64) {
        self.spawn_bar.set_length(workers);
        self.status.set_message("starting workers");
    }

    /// Record one started worker
    pub fn worker_started(&self, rank: usize, pid: u32) {
        self.status
            .set_message(format!("rank {} started (pid {})", rank, pid));
        self.spawn_bar.inc(1);
    }

    /// End the spawn phase
    pub fn finish_spawn(&self) {
        self.spawn_bar.finish();
    }

    /// Abandon all bars after a failed launch
    pub fn abandon(&self, message: &str) {
        self.staging_bar.abandon();
        self.spawn_bar.abandon();
        self.status.finish_with_message(format!("✗ {}", message));
    }

    /// Start waiting for workers
    pub fn begin_wait(&self, workers: u64) {
        self.finished.store(0, Ordering::Relaxed);
        self.status.enable_steady_tick(Duration::from_millis(120));
        self.status
            .set_message(format!("waiting for {} workers", workers));
    }

    /// Record one finished worker
    pub fn worker_finished(&self, rank: usize, outcome: &ExitOutcome) {
        let done = self.finished.fetch_add(1, Ordering::Relaxed) + 1;
        let line = format!("rank {} finished: {}", rank, outcome);
        if !outcome.is_success() && self.is_enabled() {
            let _ = self.multi.println(format!("✗ {}", line));
        }
        self.status
            .set_message(format!("{} workers finished, last: {}", done, line));
    }

    /// Stop the wait spinner
    pub fn finish_wait(&self) {
        self.status.finish_with_message(format!(
            "✓ all workers finished after {}",
            humantime::format_duration(Duration::from_secs(self.elapsed().as_secs()))
        ));
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check if progress is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl Default for LaunchProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_totals() {
        let progress = LaunchProgress::disabled();
        assert!(!progress.is_enabled());

        progress.begin_staging(2);
        let stats = StageStats {
            files: 3,
            dirs: 1,
            symlinks: 0,
            bytes: 100,
        };
        progress.workspace_staged(&stats);
        progress.workspace_staged(&stats);
        progress.finish_staging();

        assert_eq!(progress.bytes_staged.load(Ordering::Relaxed), 200);
        assert_eq!(progress.staging_bar.position(), 2);
    }

    #[test]
    fn test_wait_counts_finished() {
        let progress = LaunchProgress::disabled();
        progress.begin_wait(2);
        progress.worker_finished(0, &ExitOutcome::Exited(0));
        progress.worker_finished(1, &ExitOutcome::Exited(2));
        assert_eq!(progress.finished.load(Ordering::Relaxed), 2);
        progress.finish_wait();
    }
}
