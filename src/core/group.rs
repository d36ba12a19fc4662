//! Worker group
//!
//! Owns the handles of one launch. Workers can be detached (left running
//! after the launcher exits), joined with exit-status collection, or
//! terminated.

use crate::core::WorkerHandle;
use crate::progress::LaunchProgress;
use crossbeam::channel::unbounded;
use std::fmt;
use std::process::ExitStatus;
use std::thread;
use std::time::{Duration, Instant};

/// Time workers get to exit after SIGTERM before they are killed
pub const TERM_GRACE: Duration = Duration::from_secs(5);

const TERM_POLL: Duration = Duration::from_millis(50);

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
    /// The wait itself failed
    WaitFailed(String),
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }

        Self::WaitFailed(format!("unrecognised exit status {:?}", status))
    }

    /// Whether the worker exited cleanly
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit {}", code),
            Self::Signaled(signal) => write!(f, "signal {}", signal),
            Self::WaitFailed(message) => write!(f, "wait failed: {}", message),
        }
    }
}

/// Final state of one worker
#[derive(Debug, Clone)]
pub struct WorkerExit {
    /// Rank id
    pub rank: usize,
    /// Process id
    pub pid: u32,
    /// Outcome
    pub outcome: ExitOutcome,
    /// Time from spawn to exit
    pub elapsed: Duration,
}

/// Collected outcomes of a joined launch
#[derive(Debug, Clone)]
pub struct GroupReport {
    /// One entry per worker, ordered by rank
    pub exits: Vec<WorkerExit>,
}

impl GroupReport {
    /// Whether every worker exited cleanly
    pub fn is_success(&self) -> bool {
        self.exits.iter().all(|e| e.outcome.is_success())
    }

    /// Workers that did not exit cleanly
    pub fn failures(&self) -> impl Iterator<Item = &WorkerExit> {
        self.exits.iter().filter(|e| !e.outcome.is_success())
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== Worker Summary ===");
        for exit in &self.exits {
            println!(
                "rank {:<3} pid {:<8} {:<12} after {}",
                exit.rank,
                exit.pid,
                exit.outcome.to_string(),
                humantime::format_duration(Duration::from_secs(exit.elapsed.as_secs()))
            );
        }

        let failed = self.failures().count();
        if failed > 0 {
            println!("\nFailed workers: {} of {}", failed, self.exits.len());
        }
    }
}

/// Handles for every worker of a launch
#[derive(Debug, Default)]
pub struct WorkerGroup {
    workers: Vec<WorkerHandle>,
}

impl WorkerGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a started worker
    pub fn push(&mut self, worker: WorkerHandle) {
        self.workers.push(worker);
    }

    /// Number of workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Started workers, in spawn order
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Leave every worker running and release the handles
    ///
    /// Dropping a `Child` neither kills nor waits for it; the processes are
    /// re-parented once the launcher exits.
    pub fn detach(self) -> Vec<u32> {
        let pids: Vec<u32> = self.workers.iter().map(|w| w.pid).collect();
        tracing::info!(count = pids.len(), "workers detached");
        pids
    }

    /// Wait for every worker and collect its outcome
    ///
    /// Each child is waited on from its own thread so outcomes are reported
    /// in completion order; the returned report is ordered by rank.
    pub fn wait_all(self, progress: &LaunchProgress) -> GroupReport {
        let total = self.workers.len();
        let (tx, rx) = unbounded();

        progress.begin_wait(total as u64);

        let waiters: Vec<_> = self
            .workers
            .into_iter()
            .map(|mut worker| {
                let tx = tx.clone();
                thread::spawn(move || {
                    let outcome = match worker.child.wait() {
                        Ok(status) => ExitOutcome::from_status(status),
                        Err(e) => ExitOutcome::WaitFailed(e.to_string()),
                    };
                    let exit = WorkerExit {
                        rank: worker.rank,
                        pid: worker.pid,
                        outcome,
                        elapsed: worker.started.elapsed(),
                    };
                    // The receiver outlives every waiter
                    let _ = tx.send(exit);
                })
            })
            .collect();
        drop(tx);

        let mut exits = Vec::with_capacity(total);
        for exit in rx.iter() {
            if exit.outcome.is_success() {
                tracing::info!(rank = exit.rank, pid = exit.pid, "worker finished");
            } else {
                tracing::warn!(
                    rank = exit.rank,
                    pid = exit.pid,
                    outcome = %exit.outcome,
                    "worker failed"
                );
            }
            progress.worker_finished(exit.rank, &exit.outcome);
            exits.push(exit);
        }

        for waiter in waiters {
            let _ = waiter.join();
        }
        progress.finish_wait();

        exits.sort_by_key(|e| e.rank);
        GroupReport { exits }
    }

    /// Stop every worker and reap it, allowing [`TERM_GRACE`] to exit
    pub fn terminate(self) {
        self.terminate_with_grace(TERM_GRACE);
    }

    /// Stop every worker and reap it
    ///
    /// Sends SIGTERM on Unix, then polls until `grace` has elapsed. Workers
    /// still running after that are killed and reaped.
    pub fn terminate_with_grace(self, grace: Duration) {
        for worker in &self.workers {
            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                if let Err(e) = kill(Pid::from_raw(worker.pid as i32), Signal::SIGTERM) {
                    tracing::debug!(rank = worker.rank, error = %e, "SIGTERM failed");
                }
            }

            #[cfg(not(unix))]
            tracing::debug!(rank = worker.rank, "no SIGTERM on this platform");
        }

        let deadline = Instant::now() + grace;
        for mut worker in self.workers {
            let status = loop {
                match worker.child.try_wait() {
                    Ok(Some(status)) => break Ok(status),
                    Ok(None) if Instant::now() < deadline => thread::sleep(TERM_POLL),
                    Ok(None) => {
                        tracing::warn!(rank = worker.rank, pid = worker.pid, "worker ignored SIGTERM, killing");
                        let _ = worker.child.kill();
                        break worker.child.wait();
                    }
                    Err(e) => break Err(e),
                }
            };

            match status {
                Ok(status) => {
                    tracing::info!(rank = worker.rank, pid = worker.pid, ?status, "worker terminated")
                }
                Err(e) => {
                    tracing::warn!(rank = worker.rank, pid = worker.pid, error = %e, "failed to reap worker")
                }
            }
        }
    }
}
