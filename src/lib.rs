//! Resilient client for the n8n workflow API, served to agents as MCP tools.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod workflow;

pub use client::N8nClient;
pub use config::{ClientConfig, Settings};
pub use error::{Error, Result};
pub use workflow::{ListQuery, Tag, Workflow, WorkflowUpdate};
