//! hivemesh: a peer-to-peer swarm mesh for distributed agent task
//! delegation.
//!
//! Each node exposes a small HTTP surface and is simultaneously a client
//! of its peers. Membership converges through static seeds and gossip,
//! liveness through heartbeats and a periodic sweep, and work moves
//! across the mesh as replay-protected task requests whose results are
//! posted back asynchronously and correlated by task id.

pub mod channels;
pub mod config;
pub mod error;
pub mod settings;
pub mod swarm;
pub mod tools;

pub use config::{SelectionStrategy, SwarmConfig};
pub use error::{ConfigError, Error, SwarmError, ToolError};
pub use settings::Settings;
pub use swarm::distributor::WorkDistributor;
pub use swarm::events::MeshEvent;
pub use swarm::manager::{DelegationTicket, MeshManager, SessionFactory, TaskResultSink};
pub use swarm::protocol::{
    DelegationReply, NodeIdentity, PeerStatus, SwarmTaskRequest, SwarmTaskResult, SwarmTaskStatus,
    TaskConstraints,
};
