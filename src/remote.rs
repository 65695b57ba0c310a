//! Remote knowledge-store contract and the OpenAI threads client.
//!
//! The [`KnowledgeStore`] trait is what the upload pipeline talks to. It has
//! two operations: make sure a conversation context exists, and post one
//! piece of content into it. [`OpenAiThreadsClient`] implements it over the
//! OpenAI Assistants v2 threads API (and its Azure variant).
//!
//! # Retry Strategy
//!
//! Each call retries transient failures itself, before the pipeline ever
//! sees an error:
//! - HTTP 429 and 5xx → retry
//! - HTTP 4xx (not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: base, 2×base, 4×base, ... capped at 32×base, with the sum of
//!   sleeps bounded by `max_total_wait_secs`
//!
//! Cancellation is observed before each attempt, while a request is in
//! flight, and during every backoff sleep.

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RemoteConfig;
use crate::error::RemoteError;

/// Metadata attached to every uploaded chunk.
///
/// Serialized with string values (`{"file": "...", "chunkIndex": "3"}`),
/// which is what the threads API accepts as message metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub file: String,
    pub chunk_index: i64,
}

#[derive(Serialize)]
struct WireMetadata<'a> {
    file: &'a str,
    #[serde(rename = "chunkIndex")]
    chunk_index: String,
}

impl ChunkMetadata {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(WireMetadata {
            file: &self.file,
            chunk_index: self.chunk_index.to_string(),
        })
        .unwrap_or_default()
    }
}

/// A remote store that accumulates content in per-project conversation
/// contexts.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Return `existing` unchanged if it is a non-blank id, otherwise create a
    /// new context and return its id.
    async fn ensure_context(
        &self,
        existing: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, RemoteError>;

    /// Post `content` into `context_id`, returning the remote message id.
    async fn post_content(
        &self,
        context_id: &str,
        role: &str,
        content: &str,
        metadata: &ChunkMetadata,
        cancel: &CancellationToken,
    ) -> Result<String, RemoteError>;
}

/// [`KnowledgeStore`] backed by the OpenAI (or Azure OpenAI) threads API.
pub struct OpenAiThreadsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    organization: Option<String>,
    project: Option<String>,
    azure: bool,
    api_version: String,
    max_retries: u32,
    max_total_wait: Duration,
    retry_base_delay: Duration,
}

impl OpenAiThreadsClient {
    /// Build a client, reading the API key from the environment variable
    /// named by `config.api_key_env`.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RemoteError::MissingApiKey(config.api_key_env.clone()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &RemoteConfig, api_key: String) -> Result<Self, RemoteError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let host = Url::parse(&base_url)
            .map_err(|e| RemoteError::Other(format!("invalid remote.base_url '{base_url}': {e}")))?
            .host_str()
            .unwrap_or_default()
            .to_ascii_lowercase();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
            organization: config.organization.clone().filter(|s| !s.trim().is_empty()),
            project: config.project.clone().filter(|s| !s.trim().is_empty()),
            azure: host.contains("openai.azure.com"),
            api_version: config.api_version.clone(),
            max_retries: config.max_retries,
            max_total_wait: Duration::from_secs(config.max_total_wait_secs),
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    pub fn is_azure(&self) -> bool {
        self.azure
    }

    /// Absolute URL for an API path such as `threads/abc/messages`.
    pub fn endpoint(&self, path: &str) -> String {
        if self.is_azure() {
            let path = if path.starts_with("threads") {
                format!("openai/assistants/v2/{path}")
            } else {
                path.to_string()
            };
            let sep = if path.contains('?') { '&' } else { '?' };
            format!("{}/{}{}api-version={}", self.base_url, path, sep, self.api_version)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay * (1u32 << attempt.min(5))
    }

    /// POST `body` to `path` with retry, returning the `id` field of the
    /// JSON response.
    async fn post_for_id(
        &self,
        path: &str,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, RemoteError> {
        let url = self.endpoint(path);
        let mut attempt = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            if cancel.is_cancelled() {
                return Err(RemoteError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                r = self.send_once(&url, body) => r,
            };

            let err = match result {
                Ok(id) => return Ok(id),
                Err(e) => e,
            };

            let delay = self.backoff(attempt);
            if !err.is_transient() || attempt >= self.max_retries || waited + delay > self.max_total_wait
            {
                return Err(err);
            }

            warn!(
                url = %url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient remote failure, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            waited += delay;
            attempt += 1;
        }
    }

    async fn send_once(&self, url: &str, body: &serde_json::Value) -> Result<String, RemoteError> {
        let mut request = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);

        request = request.header("Authorization", format!("Bearer {}", self.api_key));
        if !self.is_azure() {
            request = request.header("OpenAI-Beta", "assistants=v2");
        }
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }
        if let Some(project) = &self.project {
            request = request.header("OpenAI-Project", project);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let json: serde_json::Value = response.json().await?;
        parse_id(&json)
    }
}

fn parse_id(json: &serde_json::Value) -> Result<String, RemoteError> {
    json.get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::Malformed(format!("response has no 'id': {json}")))
}

#[async_trait]
impl KnowledgeStore for OpenAiThreadsClient {
    async fn ensure_context(
        &self,
        existing: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, RemoteError> {
        if let Some(id) = existing.filter(|id| !id.trim().is_empty()) {
            return Ok(id.to_string());
        }
        self.post_for_id("threads", &serde_json::json!({}), cancel)
            .await
    }

    async fn post_content(
        &self,
        context_id: &str,
        role: &str,
        content: &str,
        metadata: &ChunkMetadata,
        cancel: &CancellationToken,
    ) -> Result<String, RemoteError> {
        let body = serde_json::json!({
            "role": role,
            "content": content,
            "metadata": metadata.to_json(),
        });
        self.post_for_id(&format!("threads/{context_id}/messages"), &body, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        threads_created: usize,
        messages: Vec<(String, Value, Option<String>)>,
        /// Number of upcoming message posts to answer with 503.
        fail_next: usize,
        /// Answer every message post with 400.
        reject: bool,
    }

    type Shared = Arc<Mutex<Recorded>>;

    async fn create_thread(State(state): State<Shared>) -> Json<Value> {
        let mut s = state.lock().unwrap();
        s.threads_created += 1;
        Json(json!({ "id": format!("thread_{}", s.threads_created) }))
    }

    async fn create_message(
        State(state): State<Shared>,
        Path(thread): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let mut s = state.lock().unwrap();
        if s.reject {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "nope" })));
        }
        if s.fail_next > 0 {
            s.fail_next -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "busy" })));
        }
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        s.messages.push((thread, body, auth));
        let id = format!("msg_{}", s.messages.len());
        (StatusCode::OK, Json(json!({ "id": id })))
    }

    async fn serve(state: Shared) -> String {
        let app = Router::new()
            .route("/v1/threads", post(create_thread))
            .route("/v1/threads/{thread}/messages", post(create_message))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn client(base_url: &str, max_retries: u32) -> OpenAiThreadsClient {
        let config = RemoteConfig {
            base_url: base_url.to_string(),
            max_retries,
            retry_base_delay_ms: 5,
            ..RemoteConfig::default()
        };
        OpenAiThreadsClient::with_api_key(&config, "sk-test".into()).unwrap()
    }

    fn meta(file: &str, index: i64) -> ChunkMetadata {
        ChunkMetadata {
            file: file.to_string(),
            chunk_index: index,
        }
    }

    #[test]
    fn metadata_wire_shape() {
        assert_eq!(
            meta("src/a.rs", 3).to_json(),
            json!({ "file": "src/a.rs", "chunkIndex": "3" })
        );
    }

    #[test]
    fn openai_and_azure_endpoints() {
        let openai = client("https://api.openai.com/v1/", 0);
        assert!(!openai.is_azure());
        assert_eq!(
            openai.endpoint("threads/t1/messages"),
            "https://api.openai.com/v1/threads/t1/messages"
        );

        let azure = client("https://acme.openai.azure.com", 0);
        assert!(azure.is_azure());
        assert_eq!(
            azure.endpoint("threads"),
            "https://acme.openai.azure.com/openai/assistants/v2/threads?api-version=2024-07-01-preview"
        );
    }

    #[test]
    fn parse_id_requires_non_empty_string() {
        assert_eq!(parse_id(&json!({ "id": "x" })).unwrap(), "x");
        assert!(matches!(parse_id(&json!({ "id": "" })), Err(RemoteError::Malformed(_))));
        assert!(parse_id(&json!({ "object": "thread" })).is_err());
    }

    #[tokio::test]
    async fn ensure_context_reuses_existing_id_without_network() {
        let state = Shared::default();
        let base = serve(state.clone()).await;
        let c = client(&base, 0);
        let cancel = CancellationToken::new();

        assert_eq!(c.ensure_context(Some("thread_keep"), &cancel).await.unwrap(), "thread_keep");
        assert_eq!(state.lock().unwrap().threads_created, 0);

        assert_eq!(c.ensure_context(Some("  "), &cancel).await.unwrap(), "thread_1");
        assert_eq!(c.ensure_context(None, &cancel).await.unwrap(), "thread_2");
    }

    #[tokio::test]
    async fn post_content_sends_role_content_metadata_and_auth() {
        let state = Shared::default();
        let base = serve(state.clone()).await;
        let c = client(&base, 0);
        let cancel = CancellationToken::new();

        let id = c
            .post_content("thread_9", "user", "fn main() {}", &meta("src/main.rs", 0), &cancel)
            .await
            .unwrap();
        assert_eq!(id, "msg_1");

        let s = state.lock().unwrap();
        let (thread, body, auth) = &s.messages[0];
        assert_eq!(thread, "thread_9");
        assert_eq!(body["role"], "user");
        assert_eq!(body["content"], "fn main() {}");
        assert_eq!(body["metadata"]["chunkIndex"], "0");
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_budget() {
        let state = Shared::default();
        state.lock().unwrap().fail_next = 2;
        let base = serve(state.clone()).await;
        let c = client(&base, 2);

        let id = c
            .post_content("t", "user", "x", &meta("a", 0), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(id, "msg_1");
    }

    #[tokio::test]
    async fn retries_exhausted_surfaces_status() {
        let state = Shared::default();
        state.lock().unwrap().fail_next = 5;
        let base = serve(state.clone()).await;
        let c = client(&base, 1);

        let err = c
            .post_content("t", "user", "x", &meta("a", 0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 503, .. }));
        assert_eq!(state.lock().unwrap().fail_next, 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let state = Shared::default();
        state.lock().unwrap().reject = true;
        let base = serve(state.clone()).await;
        let c = client(&base, 3);

        let err = c
            .post_content("t", "user", "x", &meta("a", 0), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            RemoteError::Status { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let state = Shared::default();
        let base = serve(state.clone()).await;
        let c = client(&base, 0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = c.ensure_context(None, &cancel).await.unwrap_err();
        assert!(matches!(err, RemoteError::Cancelled));
        assert_eq!(state.lock().unwrap().threads_created, 0);
    }
}
