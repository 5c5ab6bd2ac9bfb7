//! Built-in swarm tools.

pub mod swarm_distribute;
pub mod swarm_peers;

pub use swarm_distribute::SwarmDistributeTool;
pub use swarm_peers::SwarmPeersTool;
