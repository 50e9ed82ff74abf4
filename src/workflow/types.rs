use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Default page size for list and search.
pub const DEFAULT_LIMIT: u32 = 20;

/// Largest page size the API accepts.
pub const MAX_LIMIT: u32 = 100;

/// Tag attached to a workflow.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Tag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl Tag {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

/// Workflow resource as exchanged with the n8n API.
///
/// `id`, `created_at` and `updated_at` are assigned by the service. A
/// workflow being created leaves them unset.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub active: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub connections: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Identifier, empty for a workflow not yet created.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|tag| tag.name.as_str())
    }

    /// Case-insensitive match of `needle` (already lower-cased) against the
    /// name and every tag name.
    pub fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self
                .tag_names()
                .any(|name| name.to_lowercase().contains(needle))
    }
}

/// Partial update; only the fields that are set are sent.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

impl WorkflowUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Filters and paging for `list_workflows`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub active: Option<bool>,
    pub tags: Vec<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            active: None,
            tags: Vec::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl ListQuery {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Query string parameters for `GET /workflows`.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("limit", self.limit.to_string())];
        if let Some(active) = self.active {
            params.push(("active", active.to_string()));
        }
        if !self.tags.is_empty() {
            params.push(("tags", self.tags.join(",")));
        }
        if self.offset > 0 {
            params.push(("offset", self.offset.to_string()));
        }
        params
    }
}

/// Body of a collection endpoint such as `GET /workflows`: the paged
/// `{"data": [...]}` envelope or a bare array.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub(crate) enum Page<T> {
    Paged { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Page<T> {
    pub(crate) fn into_items(self) -> Vec<T> {
        match self {
            Page::Paged { data } => data,
            Page::Bare(items) => items,
        }
    }
}

/// Body of `POST /workflows`.
///
/// The service treats `active` and `tags` as read-only on create and
/// requires `settings`, so this carries only the writable fields.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewWorkflow<'a> {
    name: &'a str,
    nodes: &'a [Value],
    connections: &'a Map<String, Value>,
    settings: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    static_data: Option<&'a Value>,
}

impl<'a> From<&'a Workflow> for NewWorkflow<'a> {
    fn from(workflow: &'a Workflow) -> Self {
        Self {
            name: &workflow.name,
            nodes: &workflow.nodes,
            connections: &workflow.connections,
            settings: workflow
                .settings
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new())),
            static_data: workflow.static_data.as_ref(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
