//! Error types for DistLaunch
//!
//! This module defines all error types used throughout the launcher,
//! providing detailed error information for debugging and operator feedback.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for launch operations
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Wrong number of positional arguments
    #[error("expected 1 or 4 positional arguments, got {0}")]
    Usage(usize),

    /// Rank table missing or not a regular file
    #[error("RANK_TABLE_FILE={0} is not a file")]
    RankTableNotFound(PathBuf),

    /// Host has fewer CPUs than devices and the policy is `reject`
    #[error("cannot partition {cpus} CPUs across {devices} devices (use --cpu-policy clamp to share cores)")]
    InsufficientCpus { cpus: usize, devices: usize },

    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Workspace staging failed for a device
    #[error("failed to stage workspace for rank {rank}: {source}")]
    Staging {
        rank: usize,
        #[source]
        source: Box<LaunchError>,
    },

    /// Worker process could not be started
    #[error("failed to spawn worker for rank {rank}: {source}")]
    Spawn {
        rank: usize,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Manifest parsing/writing error
    #[error("Manifest error: {0}")]
    ManifestError(String),

    /// Signal delivery failed
    #[error("failed to signal pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    /// Multiple errors occurred
    #[error("Multiple errors occurred ({count} errors)")]
    MultipleErrors {
        count: usize,
        errors: Vec<LaunchError>,
    },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<LaunchError>,
    },
}

impl LaunchError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a staging failure for a rank
    pub fn staging(rank: usize, source: LaunchError) -> Self {
        Self::Staging {
            rank,
            source: Box::new(source),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error was raised before any side effect took place
    pub fn is_preflight(&self) -> bool {
        match self {
            Self::Usage(_)
            | Self::RankTableNotFound(_)
            | Self::InsufficientCpus { .. }
            | Self::ConfigError(_) => true,
            Self::WithContext { source, .. } => source.is_preflight(),
            _ => false,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::RankTableNotFound(path) => Some(path),
            Self::Staging { source, .. } | Self::WithContext { source, .. } => source.path(),
            _ => None,
        }
    }
}

/// Result type alias for launch operations
pub type Result<T> = std::result::Result<T, LaunchError>;

impl From<std::io::Error> for LaunchError {
    fn from(err: std::io::Error) -> Self {
        LaunchError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for LaunchError {
    fn from(err: serde_json::Error) -> Self {
        LaunchError::ManifestError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| LaunchError::io(path, e))
    }
}

/// Collects multiple results into a single result
pub fn collect_errors<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(value) => successes.push(value),
            Err(e) => errors.push(e),
        }
    }

    match errors.len() {
        0 => Ok(successes),
        1 => Err(errors.remove(0)),
        count => Err(LaunchError::MultipleErrors { count, errors }),
    }
}
