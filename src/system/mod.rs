//! Host inspection module
//!
//! Detects host resources, partitions CPUs across devices, applies
//! process affinity and locates the rank table.

mod resources;
pub mod affinity;
mod topology;

pub use resources::*;
pub use affinity::{partition_cpus, CpuRange};
pub use topology::RankTable;
