//! Workflow resources of the n8n public API.

mod types;

pub(crate) use types::{NewWorkflow, Page};
pub use types::{DEFAULT_LIMIT, ListQuery, MAX_LIMIT, Tag, Workflow, WorkflowUpdate};
