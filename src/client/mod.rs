//! Resilient client for the n8n workflow API.
//!
//! Every operation validates its input, then goes through the cache (reads),
//! the retry policy (retry-safe calls) and the transport. Writes invalidate
//! the affected cache entries once the service has accepted them.

pub mod keys;

use std::fmt;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use log::{debug, info, warn};
use reqwest::Method;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClient, Response, RetryPolicy};
use crate::workflow::{ListQuery, MAX_LIMIT, NewWorkflow, Page, Tag, Workflow, WorkflowUpdate};

/// The service has no search endpoint; search scans one page this large.
const SEARCH_SCAN_LIMIT: u32 = MAX_LIMIT;

struct Inner {
    config: ClientConfig,
    http: HttpClient,
    retry: RetryPolicy,
    cache: Cache,
}

/// Handle to one n8n instance.
///
/// Clones share the transport, the retry policy and the cache. A handle
/// returned by [`N8nClient::with_cancellation`] does too, but its calls stop
/// with [`Error::Cancelled`] once its token fires.
#[derive(Clone)]
pub struct N8nClient {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl fmt::Debug for N8nClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("N8nClient")
            .field("config", &self.inner.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl N8nClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = HttpClient::new(&config)?;
        let retry = RetryPolicy::new(
            config.max_retries,
            config.retry_base_delay,
            config.retry_max_delay,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                retry,
                cache: Cache::new(),
            }),
            cancel: CancellationToken::new(),
        })
    }

    /// View of this client whose calls are aborted when `cancel` fires.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    /// API root requests are sent to.
    pub fn endpoint(&self) -> &str {
        self.inner.http.api_base()
    }

    /// Creates a workflow and returns it as stored by the service.
    ///
    /// Tags and the active flag cannot be set by the create call itself;
    /// they are applied afterwards, tags first.
    ///
    /// Not retried: a timed out POST may already have been applied.
    #[tracing::instrument(skip(self, workflow), fields(name = %workflow.name))]
    pub async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow> {
        if workflow.name.trim().is_empty() {
            return Err(Error::validation("workflow name must not be empty"));
        }
        let body = to_json(&NewWorkflow::from(workflow))?;

        info!("Creating workflow '{}'", workflow.name);
        let response = self
            .send_once(Method::POST, "/workflows", &[], Some(&body))
            .await?;
        self.invalidate_after_write(None);

        let mut created = parse_workflow(response.json()?)?;
        let workflow_id = created.id().to_string();

        if !workflow.tags.is_empty() {
            created.tags = self.assign_tags(&workflow_id, &workflow.tags).await?;
        }
        if workflow.active && !created.active {
            self.activate_workflow(&workflow_id).await?;
            created.active = true;
        }

        info!(
            "Workflow created successfully: {} ({})",
            created.name, workflow_id
        );
        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_workflow(&self, workflow_id: &str, use_cache: bool) -> Result<Workflow> {
        let workflow_id = validate_workflow_id(workflow_id)?;
        let path = workflow_path(workflow_id, None);

        debug!("Getting workflow {}", workflow_id);
        let value = self
            .read_through(&keys::workflow(workflow_id), use_cache, move |client| {
                let path = path.clone();
                async move { client.fetch_json("get_workflow", &path, Vec::new()).await }.boxed()
            })
            .await?;

        parse_workflow(value)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_workflows(&self, query: &ListQuery, use_cache: bool) -> Result<Vec<Workflow>> {
        validate_limit(query.limit)?;
        let params = query.to_params();

        let value = self
            .read_through(&keys::list(query), use_cache, move |client| {
                let params = params.clone();
                async move { client.fetch_json("list_workflows", "/workflows", params).await }
                    .boxed()
            })
            .await?;

        let workflows = parse_workflow_list(value)?;
        info!("Listed {} workflows", workflows.len());
        Ok(workflows)
    }

    /// Workflows whose name or any tag name contains `query`, ignoring case,
    /// at most `limit` of them.
    #[tracing::instrument(skip(self))]
    pub async fn search_workflows(
        &self,
        query: &str,
        limit: u32,
        use_cache: bool,
    ) -> Result<Vec<Workflow>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::validation("search query must not be empty"));
        }
        validate_limit(limit)?;

        let value = self
            .read_through(&keys::search(query, limit), use_cache, move |client| {
                let needle = needle.clone();
                async move {
                    let candidates = client
                        .list_workflows(&ListQuery::with_limit(SEARCH_SCAN_LIMIT), use_cache)
                        .await?;
                    let matched: Vec<Workflow> = candidates
                        .into_iter()
                        .filter(|workflow| workflow.matches(&needle))
                        .take(limit as usize)
                        .collect();
                    to_json(&matched)
                }
                .boxed()
            })
            .await?;

        let workflows = parse_workflow_list(value)?;
        info!("Search for '{}' found {} workflows", query, workflows.len());
        Ok(workflows)
    }

    /// Applies a partial update and returns the updated workflow.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_workflow(
        &self,
        workflow_id: &str,
        update: &WorkflowUpdate,
    ) -> Result<Workflow> {
        let workflow_id = validate_workflow_id(workflow_id)?;
        if update.is_empty() {
            return Err(Error::validation("update must set at least one field"));
        }
        if update
            .name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(Error::validation("workflow name must not be empty"));
        }
        let body = to_json(update)?;
        let path = workflow_path(workflow_id, None);

        info!("Updating workflow {}", workflow_id);
        let response = self
            .send_with_retry("update_workflow", Method::PATCH, &path, &[], Some(&body))
            .await?;
        self.invalidate_after_write(Some(workflow_id));

        let updated = parse_workflow(response.json()?)?;
        info!("Workflow updated successfully: {}", workflow_id);
        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow_id = validate_workflow_id(workflow_id)?;
        let path = workflow_path(workflow_id, None);

        info!("Deleting workflow {}", workflow_id);
        self.send_with_retry("delete_workflow", Method::DELETE, &path, &[], None)
            .await?;
        self.invalidate_after_write(Some(workflow_id));

        info!("Workflow deleted successfully: {}", workflow_id);
        Ok(())
    }

    /// Activating an already active workflow is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn activate_workflow(&self, workflow_id: &str) -> Result<()> {
        self.set_active(workflow_id, "activate").await
    }

    #[tracing::instrument(skip(self))]
    pub async fn deactivate_workflow(&self, workflow_id: &str) -> Result<()> {
        self.set_active(workflow_id, "deactivate").await
    }

    /// Probes the API with a single unretried request.
    ///
    /// Any failure of the probe is reported as `Ok(false)`; only
    /// cancellation is an error.
    #[tracing::instrument(skip(self))]
    pub async fn health_check(&self) -> Result<bool> {
        let query = [("limit", "1".to_string())];
        match self.send_once(Method::GET, "/workflows", &query, None).await {
            Ok(_) => {
                info!("Health check passed");
                Ok(true)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!("Health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn set_active(&self, workflow_id: &str, action: &'static str) -> Result<()> {
        let workflow_id = validate_workflow_id(workflow_id)?;
        let path = workflow_path(workflow_id, Some(action));

        info!("Sending {} for workflow {}", action, workflow_id);
        self.send_with_retry(action, Method::POST, &path, &[], None)
            .await?;
        self.invalidate_after_write(Some(workflow_id));

        Ok(())
    }

    /// Replaces the tags of `workflow_id`. Tags given only by name are
    /// matched against the instance's tags and created when missing.
    async fn assign_tags(&self, workflow_id: &str, tags: &[Tag]) -> Result<Vec<Tag>> {
        let known = if tags.iter().any(|tag| tag.id.is_none()) {
            self.list_tags().await?
        } else {
            Vec::new()
        };

        let mut ids = Vec::with_capacity(tags.len());
        for tag in tags {
            let existing = tag.id.clone().or_else(|| {
                known
                    .iter()
                    .find(|candidate| candidate.name == tag.name)
                    .and_then(|candidate| candidate.id.clone())
            });
            let id = match existing {
                Some(id) => id,
                None => self.create_tag(&tag.name).await?,
            };
            ids.push(json!({ "id": id }));
        }

        let path = workflow_path(workflow_id, Some("tags"));
        debug!("Assigning {} tags to workflow {}", ids.len(), workflow_id);
        let response = self
            .send_with_retry(
                "update_workflow_tags",
                Method::PUT,
                &path,
                &[],
                Some(&Value::Array(ids)),
            )
            .await?;
        self.invalidate_after_write(Some(workflow_id));

        let assigned: Vec<Tag> = response.json()?;
        Ok(assigned)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let query = [("limit", MAX_LIMIT.to_string())];
        let page: Page<Tag> = self
            .send_with_retry("list_tags", Method::GET, "/tags", &query, None)
            .await?
            .json()?;
        Ok(page.into_items())
    }

    /// Not retried, like every other POST that creates a resource.
    async fn create_tag(&self, name: &str) -> Result<String> {
        info!("Creating tag '{}'", name);
        let body = json!({ "name": name });
        let tag: Tag = self
            .send_once(Method::POST, "/tags", &[], Some(&body))
            .await?
            .json()?;
        tag.id
            .ok_or_else(|| Error::InvalidResponse(format!("tag '{}' has no id", name)))
    }

    /// Serves `key` from the cache or from `fetch`, sharing in-flight
    /// fetches between callers.
    async fn read_through<F>(&self, key: &str, use_cache: bool, fetch: F) -> Result<Value>
    where
        F: Fn(N8nClient) -> BoxFuture<'static, Result<Value>>,
    {
        loop {
            let client = self.clone();
            let lookup = self.inner.cache.get_or_fetch(
                key,
                self.inner.config.cache_ttl,
                use_cache,
                || fetch(client),
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                result = lookup => result,
            };

            match result {
                // The shared fetch belonged to a caller whose token fired.
                Err(Error::Cancelled) if !self.cancel.is_cancelled() => {
                    debug!("Shared fetch for {} was cancelled, fetching again", key);
                }
                result => return result,
            }
        }
    }

    async fn fetch_json(
        &self,
        operation_name: &'static str,
        path: &str,
        query: Vec<(&'static str, String)>,
    ) -> Result<Value> {
        self.send_with_retry(operation_name, Method::GET, path, &query, None)
            .await?
            .json()
    }

    async fn send_with_retry(
        &self,
        operation_name: &str,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response> {
        self.inner
            .retry
            .execute(operation_name, &self.cancel, || {
                let method = method.clone();
                async move {
                    self.inner
                        .http
                        .send(method, path, query, body)
                        .await?
                        .error_for_status()
                }
            })
            .await
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            response = self.inner.http.send(method, path, query, body) => response?.error_for_status(),
        }
    }

    fn invalidate_after_write(&self, workflow_id: Option<&str>) {
        let cache = &self.inner.cache;
        if let Some(workflow_id) = workflow_id {
            cache.invalidate(&keys::workflow(workflow_id));
        }
        cache.invalidate_prefix(keys::LIST_PREFIX);
        cache.invalidate_prefix(keys::SEARCH_PREFIX);
    }
}

fn validate_workflow_id(workflow_id: &str) -> Result<&str> {
    let workflow_id = workflow_id.trim();
    if workflow_id.is_empty() {
        return Err(Error::validation("workflow_id must not be empty"));
    }
    if workflow_id.contains('/') {
        return Err(Error::validation(format!(
            "workflow_id must not contain '/': {}",
            workflow_id
        )));
    }
    Ok(workflow_id)
}

fn validate_limit(limit: u32) -> Result<()> {
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(Error::validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )));
    }
    Ok(())
}

fn workflow_path(workflow_id: &str, action: Option<&str>) -> String {
    match action {
        Some(action) => format!("/workflows/{}/{}", workflow_id, action),
        None => format!("/workflows/{}", workflow_id),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::validation(format!("failed to serialize request: {}", e)))
}

fn parse_workflow(value: Value) -> Result<Workflow> {
    let workflow = serde_json::from_value(value)
        .map_err(|e| Error::InvalidResponse(format!("malformed workflow: {}", e)))?;
    require_id(workflow)
}

fn parse_workflow_list(value: Value) -> Result<Vec<Workflow>> {
    let page: Page<Workflow> = serde_json::from_value(value)
        .map_err(|e| Error::InvalidResponse(format!("malformed workflow list: {}", e)))?;
    page.into_items().into_iter().map(require_id).collect()
}

fn require_id(workflow: Workflow) -> Result<Workflow> {
    if workflow.id().is_empty() {
        return Err(Error::InvalidResponse(format!(
            "workflow '{}' has no id",
            workflow.name
        )));
    }
    Ok(workflow)
}
