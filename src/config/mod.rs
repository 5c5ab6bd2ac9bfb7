//! Runtime configuration, resolved from settings plus environment overrides.

pub mod helpers;
mod swarm;

pub use swarm::{SelectionStrategy, SwarmConfig};
