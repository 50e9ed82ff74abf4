//! Cache keys for the read operations.
//!
//! Each key is a deterministic function of the operation and its
//! parameters, so equal requests share one entry.

use crate::workflow::ListQuery;

pub const WORKFLOW_PREFIX: &str = "get_workflow:";
pub const LIST_PREFIX: &str = "list_workflows:";
pub const SEARCH_PREFIX: &str = "search_workflows:";

pub fn workflow(id: &str) -> String {
    format!("{}{}", WORKFLOW_PREFIX, id)
}

/// Tag order does not matter to the service, so it does not matter here.
pub fn list(query: &ListQuery) -> String {
    let active = match query.active {
        Some(active) => active.to_string(),
        None => "any".to_string(),
    };
    let mut tags: Vec<&str> = query.tags.iter().map(String::as_str).collect();
    tags.sort_unstable();

    format!(
        "{}{}:{}:{}:{}",
        LIST_PREFIX,
        active,
        tags.join(","),
        query.limit,
        query.offset
    )
}

pub fn search(query: &str, limit: u32) -> String {
    format!("{}{}:{}", SEARCH_PREFIX, query.trim().to_lowercase(), limit)
}
