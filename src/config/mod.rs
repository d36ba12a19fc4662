//! Configuration module for DistLaunch
//!
//! Provides the CLI definition, path resolution, launch profiles
//! and the typed trainer invocation.

mod settings;
mod trainer;

pub use settings::*;
pub use trainer::*;
