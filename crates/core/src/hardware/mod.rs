//! Host hardware inspection.
//!
//! Pure parsing plus a thin `/proc` reader. Sampling cadence and sharing of
//! the latest snapshot live in the pipeline crate.

pub mod memory;

pub use memory::{MemoryPressure, MemorySnapshot, SystemTier};
