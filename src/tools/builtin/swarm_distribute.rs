use std::sync::Arc;

use async_trait::async_trait;

use crate::swarm::distributor::WorkDistributor;
use crate::swarm::manager::MeshManager;
use crate::swarm::protocol::TaskConstraints;
use crate::tools::tool::{
    optional_bool, optional_f64, optional_str_list, optional_u64, require_str, Tool, ToolContext,
    ToolError, ToolOutput,
};

/// Delegate a task to the mesh and wait for the peer's result.
pub struct SwarmDistributeTool {
    mesh: Arc<MeshManager>,
    distributor: Arc<WorkDistributor>,
    /// When set, return a canned result without touching the network.
    mock: bool,
}

impl SwarmDistributeTool {
    pub fn new(mesh: Arc<MeshManager>, distributor: Arc<WorkDistributor>, mock: bool) -> Self {
        Self {
            mesh,
            distributor,
            mock,
        }
    }
}

#[async_trait]
impl Tool for SwarmDistributeTool {
    fn name(&self) -> &str {
        "swarm-distribute"
    }

    fn description(&self) -> &str {
        "Delegate a task to a peer node in the swarm mesh and return its result."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_text": {
                    "type": "string",
                    "description": "Task for the peer to execute."
                },
                "tool_allowlist": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Tools the peer may use; also drives capability matching."
                },
                "max_tokens": {"type": "integer"},
                "max_cost_usd": {"type": "number"},
                "max_duration_ms": {"type": "integer"},
                "dry_run": {
                    "type": "boolean",
                    "description": "Enumerate candidate peers without dispatching."
                }
            },
            "required": ["task_text"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let task_text = require_str(&params, "task_text")?;

        if optional_bool(&params, "dry_run") {
            let candidates: Vec<serde_json::Value> = self
                .mesh
                .active_peers()
                .into_iter()
                .map(|entry| {
                    serde_json::json!({
                        "node_id": entry.identity.node_id,
                        "display_name": entry.identity.display_name,
                        "capabilities": entry.identity.capabilities,
                    })
                })
                .collect();
            return Ok(ToolOutput::success(
                serde_json::json!({
                    "dry_run": true,
                    "total": candidates.len(),
                    "candidates": candidates,
                }),
                start.elapsed(),
            ));
        }

        if self.mock {
            return Ok(ToolOutput::success(
                serde_json::json!({
                    "status": "completed",
                    "findings": [],
                    "peer_node_id": "mock-peer",
                    "peer_session_id": "mock-session",
                    "tokens_used": 0,
                    "cost_usd": 0.0,
                    "duration_ms": 0,
                    "mock": true,
                }),
                start.elapsed(),
            ));
        }

        let constraints = TaskConstraints {
            tool_allowlist: optional_str_list(&params, "tool_allowlist"),
            max_tokens: optional_u64(&params, "max_tokens"),
            max_cost_usd: optional_f64(&params, "max_cost_usd"),
            max_duration_ms: optional_u64(&params, "max_duration_ms"),
        };
        let constraints = if constraints.tool_allowlist.is_none()
            && constraints.max_tokens.is_none()
            && constraints.max_cost_usd.is_none()
            && constraints.max_duration_ms.is_none()
        {
            None
        } else {
            Some(constraints)
        };

        let result = self
            .distributor
            .distribute(task_text, &ctx.session_id, constraints)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(ToolOutput::success(
            serde_json::json!({
                "status": result.status,
                "findings": result.findings,
                "peer_node_id": result.peer_node_id,
                "peer_session_id": result.peer_session_id,
                "tokens_used": result.tokens_used,
                "cost_usd": result.cost_usd,
                "duration_ms": result.duration_ms,
            }),
            start.elapsed(),
        ))
    }
}
