//! File system operations module
//!
//! Stages the isolated per-device working directories the workers run in.

mod workspace;

pub use workspace::*;
