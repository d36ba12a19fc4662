//! Core launch module
//!
//! Provides launch planning and orchestration, worker spawning, the
//! worker group used to join or stop a launch, and the launch manifest.

mod group;
mod launcher;
mod manifest;
mod worker;

pub use group::*;
pub use launcher::*;
pub use manifest::*;
pub use worker::*;
