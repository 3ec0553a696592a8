//! Search index access
//!
//! [`SearchIndex`] is the handful of primitives the ranking pipeline and the
//! reindex coordinator need. [`ElasticsearchClient`] implements them over the
//! Elasticsearch REST API.

use crate::error::SearchError;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Search response subset used by callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub timed_out: bool,
    /// Raw `aggregations` object, `Value::Null` when the query had none
    #[serde(default)]
    pub aggregations: Value,
}

/// Handle of an asynchronous server-side task (reindex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub String);

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress of a reindex task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub completed: bool,
    pub total: u64,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Documents skipped because they already existed (`op_type: create`)
    pub version_conflicts: u64,
    /// Task level error or the first document failure
    pub error: Option<String>,
}

impl TaskStatus {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Copy request between two indices
#[derive(Debug, Clone, PartialEq)]
pub struct ReindexRequest {
    pub source: String,
    pub dest: String,
    /// Query restricting the copied documents
    pub filter: Value,
    /// Painless script run per document, typically assigning `ctx._id`
    pub id_script: Option<String>,
}

/// Primitive operations against the search engine
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Run a search document against an index or alias
    async fn search(&self, index: &str, query: &Value) -> Result<SearchResponse>;

    /// Create an index with the given settings/mappings
    async fn create_index(&self, name: &str, schema: &Value) -> Result<()>;

    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// Count documents matching `filter` (`None` counts everything)
    async fn count(&self, index: &str, filter: Option<&Value>) -> Result<u64>;

    /// Indices currently bound to `alias`; empty when the alias does not exist
    async fn alias_lookup(&self, alias: &str) -> Result<Vec<String>>;

    /// Remove `alias` from `remove_index` and add it to `add_index` in one request
    async fn alias_swap(&self, alias: &str, remove_index: &str, add_index: &str) -> Result<()>;

    /// Start an asynchronous copy; returns immediately with a task handle
    async fn reindex(&self, request: &ReindexRequest) -> Result<TaskHandle>;

    async fn task_status(&self, handle: &TaskHandle) -> Result<TaskStatus>;

    /// Make every write to `index` visible to search and count
    async fn refresh(&self, index: &str) -> Result<()>;

    async fn delete_index(&self, name: &str) -> Result<()>;
}

/// Connection settings for [`ElasticsearchClient`]
#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout; migrations use minutes, ranking seconds
    pub request_timeout: Duration,
}

impl SearchClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Elasticsearch REST client
pub struct ElasticsearchClient {
    client: Client,
    config: SearchClientConfig,
}

impl ElasticsearchClient {
    pub fn new(config: SearchClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                SearchError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        info!(
            "Search client configured for {} (timeout {:?})",
            config.base_url, config.request_timeout
        );
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let builder = self.client.request(method, url);
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_deref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SearchError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value> {
        let response = self.send(builder).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchClient {
    async fn search(&self, index: &str, query: &Value) -> Result<SearchResponse> {
        debug!("Searching {}", index);
        let response = self
            .send(self.request(Method::POST, &format!("{}/_search", index)).json(query))
            .await?;
        let parsed: SearchResponse = response.json().await?;
        if parsed.timed_out {
            warn!("Search against {} timed out after {}ms", index, parsed.took);
        }
        Ok(parsed)
    }

    async fn create_index(&self, name: &str, schema: &Value) -> Result<()> {
        info!("Creating index {}", name);
        self.send(self.request(Method::PUT, name).json(schema))
            .await?;
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let response = self.request(Method::HEAD, name).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(SearchError::Status {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn count(&self, index: &str, filter: Option<&Value>) -> Result<u64> {
        let mut builder = self.request(Method::POST, &format!("{}/_count", index));
        if let Some(filter) = filter {
            builder = builder.json(&json!({ "query": filter }));
        }
        let body = self.send_json(builder).await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| SearchError::Decode(format!("count response without count: {}", body)))
    }

    async fn alias_lookup(&self, alias: &str) -> Result<Vec<String>> {
        let result = self
            .send_json(self.request(Method::GET, &format!("_alias/{}", alias)))
            .await;
        match result {
            // Body is keyed by index name: {"tokens_v3": {"aliases": {...}}}
            Ok(Value::Object(indices)) => {
                let mut names: Vec<String> = indices.keys().cloned().collect();
                names.sort();
                Ok(names)
            }
            Ok(other) => Err(SearchError::Decode(format!(
                "unexpected alias response: {}",
                other
            ))),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn alias_swap(&self, alias: &str, remove_index: &str, add_index: &str) -> Result<()> {
        info!(
            "Swapping alias {} from {} to {}",
            alias, remove_index, add_index
        );
        let actions = json!({
            "actions": [
                { "remove": { "index": remove_index, "alias": alias } },
                { "add": { "index": add_index, "alias": alias, "is_write_index": true } }
            ]
        });
        self.send(self.request(Method::POST, "_aliases").json(&actions))
            .await?;
        Ok(())
    }

    async fn reindex(&self, request: &ReindexRequest) -> Result<TaskHandle> {
        let mut body = json!({
            "conflicts": "proceed",
            "source": { "index": request.source, "query": request.filter },
            "dest": { "index": request.dest, "op_type": "create" }
        });
        if let Some(script) = &request.id_script {
            body["script"] = json!({ "source": script, "lang": "painless" });
        }

        info!("Starting reindex {} -> {}", request.source, request.dest);
        let response = self
            .send_json(
                self.request(Method::POST, "_reindex")
                    .query(&[("wait_for_completion", "false"), ("refresh", "true")])
                    .json(&body),
            )
            .await?;

        response
            .get("task")
            .and_then(Value::as_str)
            .map(|task| TaskHandle(task.to_string()))
            .ok_or_else(|| SearchError::Decode(format!("reindex response without task: {}", response)))
    }

    async fn task_status(&self, handle: &TaskHandle) -> Result<TaskStatus> {
        let body = self
            .send_json(self.request(Method::GET, &format!("_tasks/{}", handle.0)))
            .await?;
        Ok(parse_task_status(&body))
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        debug!("Refreshing {}", index);
        self.send(self.request(Method::POST, &format!("{}/_refresh", index)))
            .await?;
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        info!("Deleting index {}", name);
        self.send(self.request(Method::DELETE, name)).await?;
        Ok(())
    }
}

/// Parse the `_tasks/<id>` body of a reindex task
pub fn parse_task_status(body: &Value) -> TaskStatus {
    let status = &body["task"]["status"];
    let count = |field: &str| status.get(field).and_then(Value::as_u64).unwrap_or(0);

    let mut task = TaskStatus {
        completed: body.get("completed").and_then(Value::as_bool).unwrap_or(false),
        total: count("total"),
        created: count("created"),
        updated: count("updated"),
        deleted: count("deleted"),
        version_conflicts: count("version_conflicts"),
        error: None,
    };

    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        task.error = Some(
            error
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        );
    } else if let Some(failure) = body["response"]["failures"]
        .as_array()
        .and_then(|failures| failures.first())
    {
        task.error = Some(
            failure["cause"]["reason"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| failure.to_string()),
        );
    }

    task
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_running_task() {
        let status = parse_task_status(&json!({
            "completed": false,
            "task": { "status": { "total": 100, "created": 40, "updated": 0, "deleted": 0, "version_conflicts": 2 } }
        }));
        assert!(!status.completed);
        assert_eq!(status.total, 100);
        assert_eq!(status.created, 40);
        assert_eq!(status.version_conflicts, 2);
        assert!(!status.failed());
    }

    #[test]
    fn parses_task_error() {
        let status = parse_task_status(&json!({
            "completed": true,
            "task": { "status": { "total": 10, "created": 3 } },
            "error": { "type": "search_phase_execution_exception", "reason": "all shards failed" }
        }));
        assert!(status.completed);
        assert_eq!(status.error.as_deref(), Some("all shards failed"));
    }

    #[test]
    fn parses_document_failures() {
        let status = parse_task_status(&json!({
            "completed": true,
            "task": { "status": { "total": 10, "created": 9 } },
            "response": { "failures": [ { "cause": { "reason": "mapper_parsing_exception" } } ] }
        }));
        assert_eq!(status.error.as_deref(), Some("mapper_parsing_exception"));
    }
}
