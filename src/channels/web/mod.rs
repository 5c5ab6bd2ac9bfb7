//! Peer-facing HTTP surface.

pub mod auth;
pub mod routes;

pub use routes::mesh_router;
