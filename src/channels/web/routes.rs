//! Peer-facing mesh endpoints.
//!
//! Thin adapters between the wire contracts and the mesh manager. All
//! routes sit behind the bearer middleware; message bodies are the JSON
//! structs from [`crate::swarm::protocol`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::channels::web::auth::{require_bearer, MeshAuth};
use crate::swarm::manager::MeshManager;
use crate::swarm::protocol::{
    Ack, DelegationReply, GossipMessage, HeartbeatMessage, JoinMessage, LeaveMessage, NodeIdentity,
    SwarmTaskRequest, SwarmTaskResult,
};

#[derive(Clone)]
pub struct MeshState {
    pub mesh: Arc<MeshManager>,
}

/// Build the router serving the peer wire protocol for one node.
pub fn mesh_router(mesh: Arc<MeshManager>) -> Router {
    let auth = MeshAuth {
        token: mesh.config().token.clone(),
    };
    Router::new()
        .route("/identity", get(identity))
        .route("/join", post(join))
        .route("/leave", post(leave))
        .route("/heartbeat", post(heartbeat))
        .route("/gossip", post(gossip))
        .route("/task/request", post(task_request))
        .route("/task/result", post(task_result))
        .layer(middleware::from_fn_with_state(auth, require_bearer))
        .with_state(MeshState { mesh })
}

async fn identity(State(state): State<MeshState>) -> Json<NodeIdentity> {
    Json(state.mesh.identity().clone())
}

async fn join(State(state): State<MeshState>, Json(msg): Json<JoinMessage>) -> Response {
    match state.mesh.handle_join(msg.identity) {
        Ok(_) => Json(Ack::ok()).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn leave(State(state): State<MeshState>, Json(msg): Json<LeaveMessage>) -> Json<Ack> {
    state.mesh.handle_leave(&msg.node_id);
    Json(Ack::ok())
}

async fn heartbeat(State(state): State<MeshState>, Json(msg): Json<HeartbeatMessage>) -> Json<Ack> {
    // Latency is the server-side round trip; the submitted timestamp is
    // informational only.
    let received_at = Instant::now();
    state
        .mesh
        .handle_heartbeat(&msg, received_at.elapsed().as_millis() as u64);
    Json(Ack::ok())
}

async fn gossip(State(state): State<MeshState>, Json(msg): Json<GossipMessage>) -> Json<GossipMessage> {
    Json(state.mesh.handle_gossip(&msg).await)
}

async fn task_request(
    State(state): State<MeshState>,
    Json(req): Json<SwarmTaskRequest>,
) -> Json<DelegationReply> {
    Json(state.mesh.handle_task_request(&req).await)
}

async fn task_result(
    State(state): State<MeshState>,
    Json(res): Json<SwarmTaskResult>,
) -> Json<Ack> {
    state.mesh.handle_task_result(res).await;
    Json(Ack::ok())
}
