//! Model Context Protocol front end.
//!
//! Exposes the workflow operations of [`crate::client::N8nClient`] as MCP
//! tools served over stdio.

mod server;
mod tools;

pub use server::N8nMcpServer;
pub use tools::{
    CreateWorkflowParams, GetWorkflowParams, ListWorkflowsParams, N8nService,
    SearchWorkflowsParams, UpdateWorkflowParams, WorkflowIdParams,
};
