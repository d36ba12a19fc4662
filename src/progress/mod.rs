//! Progress reporting module
//!
//! Shows workspace staging, worker startup and, when joining, worker
//! completion.

mod reporter;

pub use reporter::*;
