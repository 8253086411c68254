//! # Remote Gateway
//!
//! Typed request/response boundary to the remote subscriber backend.
//!
//! ## Request Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  path ("/api/subscribers" or "/subscribers")                            │
//! │     │                                                                   │
//! │     ▼  normalize_path: strip leading /api                               │
//! │  {base_url}/subscribers                                                 │
//! │     │                                                                   │
//! │     ▼  scope: ?isp_id&branch_id + x-isp-id / x-branch-id /              │
//! │     │         x-user-id / x-username headers                            │
//! │     ▼  auth:  Authorization: Bearer <token>                             │
//! │     ▼  log:   redact(params, body) when debug_log_requests              │
//! │     ▼  send with timeout (interactive or bulk profile)                  │
//! │     │                                                                   │
//! │     ├── network error / timeout ──► SyncError::Transport / Timeout      │
//! │     ├── status ∉ expected ────────► SyncError::RemoteRejection          │
//! │     └── ok ───────────────────────► serde_json::Value                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The gateway never retries a call; a failed call fails fast and the
//! background job layer decides whether the whole operation runs again.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{normalize_base_url, EngineConfig, RemoteSettings, ScopeSettings};
use crate::error::{SyncError, SyncResult};

/// `200` only.
pub const EXPECT_OK: &[u16] = &[200];
/// `200` or `201`.
pub const EXPECT_CREATED: &[u16] = &[200, 201];
/// `201` only (document upload).
pub const EXPECT_UPLOADED: &[u16] = &[201];
/// `200` or `204`.
pub const EXPECT_DELETED: &[u16] = &[200, 204];

/// Maximum characters of a rejection body kept in the error message.
const MAX_ERROR_BODY: usize = 2000;

/// What a tolerant delete found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The backend answered 404.
    AlreadyGone,
}

/// A file plus text fields for a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadForm {
    pub fields: Vec<(&'static str, String)>,
    pub file_field: &'static str,
    pub file_name: String,
    pub mime: String,
    pub content: Vec<u8>,
}

enum RequestBody<'a> {
    Empty,
    Json(&'a Value),
    Multipart(UploadForm),
}

// =============================================================================
// Redaction
// =============================================================================

/// Replaces every value whose key contains `password` or `token`
/// (case-insensitive) with `"***"`, recursively.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut out = Map::with_capacity(obj.len());
            for (key, inner) in obj {
                let lower = key.to_lowercase();
                if lower.contains("password") || lower.contains("token") {
                    out.insert(key.clone(), Value::String("***".into()));
                } else {
                    out.insert(key.clone(), redact(inner));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Strips a leading `/api` so callers may pass either form.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let path = format!("/{}", path.trim_start_matches('/'));
    if path == "/api" {
        return String::new();
    }
    match path.strip_prefix("/api/") {
        Some(rest) => format!("/{}", rest),
        None => path,
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// HTTP client for the remote backend.
///
/// Cloning is cheap; [`RemoteGateway::with_timeout`] derives a copy for
/// the bulk-job timeout profile.
#[derive(Clone)]
pub struct RemoteGateway {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    scope: ScopeSettings,
    timeout: Duration,
    debug_log_requests: bool,
}

impl std::fmt::Debug for RemoteGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteGateway")
            .field("base_url", &self.base_url)
            .field("scope", &self.scope)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteGateway {
    /// Builds a gateway from remote and scope settings.
    pub fn new(settings: &RemoteSettings, scope: ScopeSettings) -> SyncResult<Self> {
        if settings.base_url.trim().is_empty() {
            return Err(SyncError::Config(
                "remote.base_url must be set before using the backend".into(),
            ));
        }
        let base_url = normalize_base_url(&settings.base_url);
        url::Url::parse(&base_url)?;

        let client = Client::builder()
            .timeout(settings.timeout())
            .danger_accept_invalid_certs(!settings.verify_tls)
            .user_agent(concat!("ledger-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(RemoteGateway {
            client,
            base_url,
            auth_header: settings
                .api_token
                .as_ref()
                .filter(|t| !t.is_empty())
                .map(|t| format!("Bearer {}", t)),
            scope,
            timeout: settings.timeout(),
            debug_log_requests: settings.debug_log_requests,
        })
    }

    pub fn from_config(config: &EngineConfig) -> SyncResult<Self> {
        Self::new(&config.remote, config.scope.clone())
    }

    /// Copy of this gateway using a different per-request timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut gateway = self.clone();
        gateway.timeout = timeout;
        gateway
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn scope(&self) -> &ScopeSettings {
        &self.scope
    }

    // =========================================================================
    // Verbs
    // =========================================================================

    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Value> {
        self.execute(Method::GET, path, query, RequestBody::Empty, EXPECT_OK)
            .await
    }

    pub async fn post_json(&self, path: &str, body: &Value, expect: &[u16]) -> SyncResult<Value> {
        self.execute(Method::POST, path, &[], RequestBody::Json(body), expect)
            .await
    }

    pub async fn put_json(&self, path: &str, body: &Value, expect: &[u16]) -> SyncResult<Value> {
        self.execute(Method::PUT, path, &[], RequestBody::Json(body), expect)
            .await
    }

    /// DELETE that treats 404 as already gone.
    pub async fn delete(&self, path: &str) -> SyncResult<DeleteOutcome> {
        let mut tolerant = EXPECT_DELETED.to_vec();
        tolerant.push(404);
        let (status, _) = self
            .send(Method::DELETE, path, &[], RequestBody::Empty, &tolerant)
            .await?;
        if status == 404 {
            debug!(path = %path, "Remote record already gone");
            Ok(DeleteOutcome::AlreadyGone)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }

    /// Multipart POST.
    pub async fn upload(&self, path: &str, form: UploadForm, expect: &[u16]) -> SyncResult<Value> {
        self.execute(Method::POST, path, &[], RequestBody::Multipart(form), expect)
            .await
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: RequestBody<'_>,
        expect: &[u16],
    ) -> SyncResult<Value> {
        let (_, value) = self.send(method, path, query, body, expect).await?;
        Ok(value)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: RequestBody<'_>,
        expect: &[u16],
    ) -> SyncResult<(u16, Value)> {
        let normalized = normalize_path(path);
        let url = format!("{}{}", self.base_url, normalized);
        let params = self.scoped_params(query);

        if self.debug_log_requests {
            let logged_body = match &body {
                RequestBody::Empty => Value::Null,
                RequestBody::Json(value) => redact(value),
                RequestBody::Multipart(form) => {
                    let fields: Map<String, Value> = form
                        .fields
                        .iter()
                        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
                        .collect();
                    redact(&Value::Object(fields))
                }
            };
            let logged_params: Map<String, Value> = params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let logged_params = redact(&Value::Object(logged_params));
            info!(
                method = %method,
                url = %url,
                params = %logged_params,
                body = %logged_body,
                "Remote request"
            );
        }

        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(self.headers())
            .timeout(self.timeout);
        if !params.is_empty() {
            request = request.query(&params);
        }
        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Multipart(form) => request.multipart(build_form(form)?),
        };

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;

        if !expect.contains(&status) {
            return Err(SyncError::RemoteRejection {
                status,
                method: method.to_string(),
                path: normalized,
                message: rejection_message(&bytes),
            });
        }

        let value = parse_body(&bytes);
        if self.debug_log_requests {
            debug!(status, body = %redact(&value), "Remote response");
        }
        Ok((status, value))
    }

    fn scoped_params(&self, query: &[(&str, String)]) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let has = |params: &Vec<(String, String)>, key: &str| params.iter().any(|(k, _)| k == key);
        if let Some(isp) = self.scope.isp_id {
            if !has(&params, "isp_id") {
                params.push(("isp_id".into(), isp.to_string()));
            }
        }
        if let Some(branch) = self.scope.branch_id {
            if !has(&params, "branch_id") {
                params.push(("branch_id".into(), branch.to_string()));
            }
        }
        params
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(auth) = &self.auth_header {
            if let Ok(value) = HeaderValue::from_str(auth) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let scope_headers = [
            ("x-isp-id", self.scope.isp_id.map(|v| v.to_string())),
            ("x-branch-id", self.scope.branch_id.map(|v| v.to_string())),
            ("x-user-id", self.scope.user_id.map(|v| v.to_string())),
            ("x-username", self.scope.username.clone()),
        ];
        for (name, value) in scope_headers {
            let Some(value) = value else { continue };
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
        headers
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout.as_secs())
        } else {
            SyncError::from(err)
        }
    }
}

fn build_form(upload: UploadForm) -> SyncResult<Form> {
    let part = Part::bytes(upload.content)
        .file_name(upload.file_name)
        .mime_str(&upload.mime)
        .map_err(|e| SyncError::Internal(format!("Failed to create multipart: {}", e)))?;

    let mut form = Form::new();
    for (key, value) in upload.fields {
        form = form.text(key, value);
    }
    Ok(form.part(upload.file_field, part))
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Backend message of a rejection: `message` / `error` of a JSON body, the
/// JSON itself, or the raw text.
fn rejection_message(bytes: &[u8]) -> String {
    let message = match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| redact(&value).to_string()),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    };
    if message.chars().count() > MAX_ERROR_BODY {
        message.chars().take(MAX_ERROR_BODY).collect()
    } else {
        message
    }
}
