//! MCP tools exposed to agents, one per client operation.

use log::warn;
use rmcp::{Error as McpError, ServerHandler, model::*, tool};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::client::N8nClient;
use crate::config::McpSettings;
use crate::error::Error;
use crate::workflow::{DEFAULT_LIMIT, ListQuery, Tag, Workflow, WorkflowUpdate};

/// Handles tool calls against one n8n instance.
#[derive(Debug, Clone)]
pub struct N8nService {
    client: N8nClient,
    info: McpSettings,
}

impl N8nService {
    pub fn new(client: N8nClient, info: McpSettings) -> Self {
        Self { client, info }
    }

    pub fn client(&self) -> &N8nClient {
        &self.client
    }
}

// ============================================================================
// Tool Parameter Types
// ============================================================================

/// Parameters for creating a workflow
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateWorkflowParams {
    /// Workflow name
    pub name: String,
    /// Workflow nodes
    #[serde(default)]
    pub nodes: Vec<Value>,
    /// Connections between nodes, keyed by source node name
    #[serde(default)]
    pub connections: Map<String, Value>,
    /// Whether the workflow starts active
    #[serde(default)]
    pub active: bool,
    /// Tag names
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Parameters identifying one workflow
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkflowIdParams {
    /// Workflow ID
    pub workflow_id: String,
}

/// Parameters for getting a workflow
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetWorkflowParams {
    /// Workflow ID
    pub workflow_id: String,
    /// Serve from the cache when possible (default: true)
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

/// Parameters for listing workflows
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListWorkflowsParams {
    /// Only workflows with this active state
    #[serde(default)]
    pub active: Option<bool>,
    /// Only workflows carrying these tags
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Maximum number of workflows to return, 1-100 (default: 20)
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Number of workflows to skip (default: 0)
    #[serde(default)]
    pub offset: u32,
}

/// Parameters for searching workflows
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchWorkflowsParams {
    /// Text to look for in workflow names and tags
    pub query: String,
    /// Maximum number of results, 1-100 (default: 20)
    #[serde(default = "default_limit")]
    pub limit: u32,
}

/// Parameters for updating a workflow; omitted fields are left unchanged
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateWorkflowParams {
    /// Workflow ID
    pub workflow_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Option<Vec<Value>>,
    #[serde(default)]
    pub connections: Option<Map<String, Value>>,
    #[serde(default)]
    pub active: Option<bool>,
    /// Tag names, replacing the current tags
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool(tool_box)]
impl N8nService {
    #[tool(description = "Create a new n8n workflow. Returns the new workflow's ID.")]
    pub async fn create_workflow(
        &self,
        #[tool(aggr)] params: CreateWorkflowParams,
    ) -> Result<CallToolResult, McpError> {
        let workflow = Workflow {
            name: params.name,
            nodes: params.nodes,
            connections: params.connections,
            active: params.active,
            tags: params.tags.into_iter().map(Tag::named).collect(),
            ..Default::default()
        };

        match self.client.create_workflow(&workflow).await {
            Ok(created) => success(json!({
                "success": true,
                "message": format!("Workflow '{}' created successfully", created.name),
                "workflow": summary(&created),
            })),
            Err(e) => failure("creating workflow", None, &e),
        }
    }

    #[tool(description = "Get the full definition of a workflow by ID, including nodes and connections.")]
    pub async fn get_workflow(
        &self,
        #[tool(aggr)] params: GetWorkflowParams,
    ) -> Result<CallToolResult, McpError> {
        match self
            .client
            .get_workflow(&params.workflow_id, params.use_cache)
            .await
        {
            Ok(workflow) => success(json!({
                "success": true,
                "workflow": workflow,
            })),
            Err(e) => failure("getting workflow", Some(&params.workflow_id), &e),
        }
    }

    #[tool(description = "List workflows, optionally filtered by active state and tags.")]
    pub async fn list_workflows(
        &self,
        #[tool(aggr)] params: ListWorkflowsParams,
    ) -> Result<CallToolResult, McpError> {
        let query = ListQuery {
            active: params.active,
            tags: params.tags.unwrap_or_default(),
            limit: params.limit,
            offset: params.offset,
        };

        match self.client.list_workflows(&query, true).await {
            Ok(workflows) => success(json!({
                "success": true,
                "count": workflows.len(),
                "workflows": workflows.iter().map(summary).collect::<Vec<_>>(),
            })),
            Err(e) => failure("listing workflows", None, &e),
        }
    }

    #[tool(description = "Search workflows by name or tag, case-insensitively.")]
    pub async fn search_workflows(
        &self,
        #[tool(aggr)] params: SearchWorkflowsParams,
    ) -> Result<CallToolResult, McpError> {
        match self
            .client
            .search_workflows(&params.query, params.limit, true)
            .await
        {
            Ok(workflows) => success(json!({
                "success": true,
                "query": params.query,
                "found": workflows.len(),
                "workflows": workflows.iter().map(summary).collect::<Vec<_>>(),
            })),
            Err(e) => failure("searching workflows", None, &e),
        }
    }

    #[tool(description = "Update a workflow. Only the fields given are changed.")]
    pub async fn update_workflow(
        &self,
        #[tool(aggr)] params: UpdateWorkflowParams,
    ) -> Result<CallToolResult, McpError> {
        let update = WorkflowUpdate {
            name: params.name,
            active: params.active,
            nodes: params.nodes,
            connections: params.connections,
            settings: None,
            tags: params
                .tags
                .map(|tags| tags.into_iter().map(Tag::named).collect()),
        };

        match self
            .client
            .update_workflow(&params.workflow_id, &update)
            .await
        {
            Ok(updated) => success(json!({
                "success": true,
                "message": format!("Workflow '{}' updated successfully", updated.name),
                "workflow": summary(&updated),
            })),
            Err(e) => failure("updating workflow", Some(&params.workflow_id), &e),
        }
    }

    #[tool(description = "Delete a workflow by ID.")]
    pub async fn delete_workflow(
        &self,
        #[tool(aggr)] params: WorkflowIdParams,
    ) -> Result<CallToolResult, McpError> {
        match self.client.delete_workflow(&params.workflow_id).await {
            Ok(()) => success(json!({
                "success": true,
                "message": format!("Workflow '{}' deleted successfully", params.workflow_id),
                "workflow_id": params.workflow_id,
            })),
            Err(e) => failure("deleting workflow", Some(&params.workflow_id), &e),
        }
    }

    #[tool(description = "Activate a workflow so its triggers start running.")]
    pub async fn activate_workflow(
        &self,
        #[tool(aggr)] params: WorkflowIdParams,
    ) -> Result<CallToolResult, McpError> {
        match self.client.activate_workflow(&params.workflow_id).await {
            Ok(()) => success(json!({
                "success": true,
                "message": format!("Workflow '{}' activated successfully", params.workflow_id),
                "workflow_id": params.workflow_id,
                "active": true,
            })),
            Err(e) => failure("activating workflow", Some(&params.workflow_id), &e),
        }
    }

    #[tool(description = "Deactivate a workflow so its triggers stop running.")]
    pub async fn deactivate_workflow(
        &self,
        #[tool(aggr)] params: WorkflowIdParams,
    ) -> Result<CallToolResult, McpError> {
        match self.client.deactivate_workflow(&params.workflow_id).await {
            Ok(()) => success(json!({
                "success": true,
                "message": format!("Workflow '{}' deactivated successfully", params.workflow_id),
                "workflow_id": params.workflow_id,
                "active": false,
            })),
            Err(e) => failure("deactivating workflow", Some(&params.workflow_id), &e),
        }
    }

    #[tool(description = "Check whether the n8n API is reachable with the configured key.")]
    pub async fn health_check(&self) -> Result<CallToolResult, McpError> {
        let endpoint = self.client.endpoint();
        let result = match self.client.health_check().await {
            Ok(healthy) => {
                let message = if healthy {
                    "n8n API is accessible"
                } else {
                    "n8n API is not accessible"
                };
                json!({
                    "success": true,
                    "healthy": healthy,
                    "message": message,
                    "endpoint": endpoint,
                })
            }
            Err(e) => json!({
                "success": false,
                "healthy": false,
                "error": e.to_string(),
                "endpoint": endpoint,
            }),
        };
        success(result)
    }
}

#[tool(tool_box)]
impl ServerHandler for N8nService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(self.info.description.clone()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.info.server_name.clone(),
                version: self.info.version.clone(),
            },
            ..Default::default()
        }
    }
}

fn summary(workflow: &Workflow) -> Value {
    json!({
        "id": workflow.id(),
        "name": workflow.name,
        "active": workflow.active,
        "nodes_count": workflow.nodes.len(),
    })
}

fn success(result: Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&result).unwrap_or_default(),
    )]))
}

/// Client errors are returned as failed tool results so the agent sees the
/// message.
fn failure(
    action: &str,
    workflow_id: Option<&str>,
    error: &Error,
) -> Result<CallToolResult, McpError> {
    let message = match workflow_id {
        Some(workflow_id) if error.is_not_found() => {
            format!("Workflow not found: {}", workflow_id)
        }
        _ => format!("Error {}: {}", action, error),
    };
    warn!("{}", message);
    Ok(CallToolResult::error(vec![Content::text(message)]))
}
