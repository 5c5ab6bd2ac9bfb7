use std::sync::Arc;

use async_trait::async_trait;

use crate::swarm::manager::MeshManager;
use crate::swarm::peer_table::PeerEntry;
use crate::swarm::protocol::PeerStatus;
use crate::tools::tool::{optional_str, Tool, ToolContext, ToolError, ToolOutput};

/// Inspect swarm membership from the local runtime.
pub struct SwarmPeersTool {
    mesh: Arc<MeshManager>,
}

impl SwarmPeersTool {
    pub fn new(mesh: Arc<MeshManager>) -> Self {
        Self { mesh }
    }
}

fn parse_status(raw: &str) -> Result<PeerStatus, ToolError> {
    match raw {
        "active" => Ok(PeerStatus::Active),
        "suspected" => Ok(PeerStatus::Suspected),
        "unreachable" => Ok(PeerStatus::Unreachable),
        "left" => Ok(PeerStatus::Left),
        other => Err(ToolError::InvalidParameters(format!(
            "unknown status_filter '{other}'"
        ))),
    }
}

fn project(entry: &PeerEntry) -> serde_json::Value {
    serde_json::json!({
        "node_id": entry.identity.node_id,
        "display_name": entry.identity.display_name,
        "api_url": entry.identity.api_url,
        "capabilities": entry.identity.capabilities,
        "version": entry.identity.version,
        "status": entry.status,
        "last_latency_ms": entry.last_latency_ms,
        "consecutive_failures": entry.consecutive_failures,
        "joined_at": entry.joined_at.to_rfc3339(),
    })
}

#[async_trait]
impl Tool for SwarmPeersTool {
    fn name(&self) -> &str {
        "swarm-peers"
    }

    fn description(&self) -> &str {
        "List known swarm peers with status, capabilities, and liveness detail."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status_filter": {
                    "type": "string",
                    "enum": ["active", "suspected", "unreachable", "left"]
                },
                "capability_filter": {
                    "type": "string",
                    "description": "Only peers advertising this capability."
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();

        let entries = match optional_str(&params, "status_filter") {
            Some(raw) => self.mesh.peers_by_status(parse_status(raw)?),
            None => self.mesh.all_peers(),
        };
        let entries: Vec<PeerEntry> = match optional_str(&params, "capability_filter") {
            Some(cap) => entries
                .into_iter()
                .filter(|e| e.identity.capabilities.iter().any(|c| c == cap))
                .collect(),
            None => entries,
        };

        let peers: Vec<serde_json::Value> = entries.iter().map(project).collect();
        let local = self.mesh.identity();

        Ok(ToolOutput::success(
            serde_json::json!({
                "self": {
                    "node_id": local.node_id,
                    "display_name": local.display_name,
                    "api_url": local.api_url,
                    "capabilities": local.capabilities,
                    "version": local.version,
                },
                "total": peers.len(),
                "peers": peers,
            }),
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwarmConfig;
    use crate::settings::Settings;
    use crate::swarm::protocol::NodeIdentity;

    fn mesh_with_peers() -> Arc<MeshManager> {
        let settings = Settings::default();
        let config = SwarmConfig::resolve(&settings).unwrap();
        let mesh = MeshManager::new(config, None);
        for (id, caps) in [("peer-a", vec!["read-file"]), ("peer-b", vec!["shell"])] {
            mesh.handle_join(NodeIdentity {
                node_id: id.to_string(),
                display_name: id.to_string(),
                api_url: format!("http://{id}:3100"),
                capabilities: caps.into_iter().map(str::to_string).collect(),
                version: "0.3.0".to_string(),
            })
            .unwrap();
        }
        mesh.handle_leave("peer-b");
        mesh
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "sess-1".to_string(),
        }
    }

    #[tokio::test]
    async fn lists_all_peers_with_self() {
        let mesh = mesh_with_peers();
        let tool = SwarmPeersTool::new(Arc::clone(&mesh));
        let output = tool.execute(serde_json::json!({}), &ctx()).await.unwrap();

        assert_eq!(output.result["total"], 2);
        assert_eq!(
            output.result["self"]["node_id"],
            mesh.identity().node_id.as_str()
        );
    }

    #[tokio::test]
    async fn filters_by_status_and_capability() {
        let mesh = mesh_with_peers();
        let tool = SwarmPeersTool::new(mesh);

        let left = tool
            .execute(serde_json::json!({"status_filter": "left"}), &ctx())
            .await
            .unwrap();
        assert_eq!(left.result["total"], 1);
        assert_eq!(left.result["peers"][0]["node_id"], "peer-b");

        let readers = tool
            .execute(serde_json::json!({"capability_filter": "read-file"}), &ctx())
            .await
            .unwrap();
        assert_eq!(readers.result["total"], 1);
        assert_eq!(readers.result["peers"][0]["node_id"], "peer-a");
    }

    #[tokio::test]
    async fn unknown_status_filter_is_invalid() {
        let mesh = mesh_with_peers();
        let tool = SwarmPeersTool::new(mesh);
        let err = tool
            .execute(serde_json::json!({"status_filter": "zombie"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
