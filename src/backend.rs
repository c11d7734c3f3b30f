//! Dual-endpoint pipeline caller.
//!
//! Every outbound pipeline call goes through [`DualEndpointClient`]: try the
//! primary base URL, and on any failure — connect error, timeout, non-2xx —
//! replay the identical request against the fallback base URL. The two
//! deployments share an API shape, so only the base differs. There is no
//! backoff here and no second round: one primary→fallback handoff, then the
//! fallback's outcome is final.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::config::BackendConfig;
use crate::error::BackendError;

/// One outbound request: method, path suffix, payload, transport options.
/// The primary/fallback bases are fixed per deployment and not part of the
/// spec; only path and payload vary per call.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Per-call timeout override; calls vary from short existence checks to
    /// long generation requests.
    pub timeout: Option<Duration>,
    /// Expect a binary body instead of JSON.
    pub binary: bool,
}

impl CallSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            timeout: None,
            binary: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }
}

/// Response body, decoded per the call's expectation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Binary(Bytes),
}

/// Successful pipeline response from whichever endpoint answered.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
}

impl BackendResponse {
    /// The JSON body, if this response carries one.
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Binary(_) => None,
        }
    }
}

/// Seam between the failover logic and the wire. Production uses
/// [`HttpTransport`]; tests substitute a mock.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, base: &Url, spec: &CallSpec) -> Result<BackendResponse, BackendError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpTransport {
    pub fn new(default_timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            default_timeout,
        })
    }
}

fn join_url(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, base: &Url, spec: &CallSpec) -> Result<BackendResponse, BackendError> {
        let url = join_url(base, &spec.path);
        let mut request = self
            .client
            .request(spec.method.clone(), &url)
            .timeout(spec.timeout.unwrap_or(self.default_timeout));
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                method: spec.method.to_string(),
                path: spec.path.clone(),
            });
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let body = if spec.binary {
            ResponseBody::Binary(response.bytes().await?)
        } else {
            let bytes = response.bytes().await?;
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| BackendError::InvalidResponse(format!("{e}")))?;
            ResponseBody::Json(value)
        };

        Ok(BackendResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

/// Primary-then-fallback caller over a [`Transport`].
pub struct DualEndpointClient {
    transport: Arc<dyn Transport>,
    primary: Url,
    fallback: Url,
}

impl DualEndpointClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
        Ok(Self::with_transport(
            config.primary_url.clone(),
            config.fallback_url.clone(),
            transport,
        ))
    }

    pub fn with_transport(primary: Url, fallback: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            primary,
            fallback,
        }
    }

    /// Execute one logical call. The primary's error is logged and discarded;
    /// when both endpoints fail, the surfaced error carries the fallback's
    /// failure reason.
    pub async fn call(&self, spec: CallSpec) -> Result<BackendResponse, BackendError> {
        match self.transport.send(&self.primary, &spec).await {
            Ok(response) => Ok(response),
            Err(primary_err) => {
                tracing::warn!(
                    method = %spec.method,
                    url = %join_url(&self.primary, &spec.path),
                    error = %primary_err,
                    "Primary pipeline call failed, trying fallback"
                );
                self.transport
                    .send(&self.fallback, &spec)
                    .await
                    .map_err(|fallback_err| {
                        tracing::error!(
                            method = %spec.method,
                            url = %join_url(&self.fallback, &spec.path),
                            error = %fallback_err,
                            "Fallback pipeline call failed"
                        );
                        BackendError::Unavailable {
                            method: spec.method.to_string(),
                            path: spec.path.clone(),
                            reason: fallback_err.to_string(),
                        }
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use serde_json::json;

    /// Transport that answers per base URL and counts calls.
    struct MockTransport {
        primary_base: Url,
        primary_result: Mutex<Option<Result<BackendResponse, BackendError>>>,
        fallback_result: Mutex<Option<Result<BackendResponse, BackendError>>>,
        primary_calls: Mutex<u32>,
        fallback_calls: Mutex<u32>,
    }

    fn ok_response(body: Value) -> BackendResponse {
        BackendResponse {
            status: 200,
            headers: HashMap::new(),
            body: ResponseBody::Json(body),
        }
    }

    fn timeout_error() -> BackendError {
        BackendError::InvalidResponse("connection timed out".to_string())
    }

    impl MockTransport {
        fn new(
            primary_base: &Url,
            primary: Result<BackendResponse, BackendError>,
            fallback: Result<BackendResponse, BackendError>,
        ) -> Self {
            Self {
                primary_base: primary_base.clone(),
                primary_result: Mutex::new(Some(primary)),
                fallback_result: Mutex::new(Some(fallback)),
                primary_calls: Mutex::new(0),
                fallback_calls: Mutex::new(0),
            }
        }

        fn primary_calls(&self) -> u32 {
            *self.primary_calls.lock().unwrap()
        }

        fn fallback_calls(&self) -> u32 {
            *self.fallback_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(
            &self,
            base: &Url,
            _spec: &CallSpec,
        ) -> Result<BackendResponse, BackendError> {
            if *base == self.primary_base {
                *self.primary_calls.lock().unwrap() += 1;
                self.primary_result
                    .lock()
                    .unwrap()
                    .take()
                    .expect("primary called more than once")
            } else {
                *self.fallback_calls.lock().unwrap() += 1;
                self.fallback_result
                    .lock()
                    .unwrap()
                    .take()
                    .expect("fallback called more than once")
            }
        }
    }

    fn bases() -> (Url, Url) {
        (
            Url::parse("http://primary.local:8443").unwrap(),
            Url::parse("http://fallback.local:8443").unwrap(),
        )
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let (primary, fallback) = bases();
        let transport = Arc::new(MockTransport::new(
            &primary,
            Ok(ok_response(json!({"hits": 3}))),
            Ok(ok_response(json!({"hits": 0}))),
        ));
        let client = DualEndpointClient::with_transport(
            primary,
            fallback,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let response = client.call(CallSpec::post("/search")).await.unwrap();
        assert_eq!(response.json().unwrap()["hits"], 3);
        assert_eq!(transport.primary_calls(), 1);
        assert_eq!(transport.fallback_calls(), 0);
    }

    #[tokio::test]
    async fn primary_timeout_falls_back() {
        // POST /search with the primary timing out; the fallback answers
        // 200 with a hit list and the caller sees only that response.
        let (primary, fallback) = bases();
        let transport = Arc::new(MockTransport::new(
            &primary,
            Err(timeout_error()),
            Ok(ok_response(json!([{"name": "A"}]))),
        ));
        let client = DualEndpointClient::with_transport(
            primary,
            fallback,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let response = client
            .call(CallSpec::post("/search").json(json!({"query": "rust"})))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.json().unwrap()[0]["name"], "A");
        assert_eq!(transport.primary_calls(), 1);
        assert_eq!(transport.fallback_calls(), 1);
    }

    #[tokio::test]
    async fn both_fail_surfaces_fallback_error() {
        let (primary, fallback) = bases();
        let transport = Arc::new(MockTransport::new(
            &primary,
            Err(timeout_error()),
            Err(BackendError::Status {
                status: 503,
                method: "POST".to_string(),
                path: "/search".to_string(),
            }),
        ));
        let client = DualEndpointClient::with_transport(primary, fallback, transport);

        let err = client.call(CallSpec::post("/search")).await.unwrap_err();
        match err {
            BackendError::Unavailable { method, path, reason } => {
                assert_eq!(method, "POST");
                assert_eq!(path, "/search");
                assert!(
                    reason.contains("503"),
                    "reason should be the fallback's error, got: {reason}"
                );
            }
            other => panic!("expected Unavailable, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_2xx_primary_falls_back() {
        let (primary, fallback) = bases();
        let transport = Arc::new(MockTransport::new(
            &primary,
            Err(BackendError::Status {
                status: 500,
                method: "GET".to_string(),
                path: "/health".to_string(),
            }),
            Ok(ok_response(json!({"ok": true}))),
        ));
        let client = DualEndpointClient::with_transport(
            primary,
            fallback,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );

        let response = client.call(CallSpec::get("/health")).await.unwrap();
        assert_eq!(response.json().unwrap()["ok"], true);
        assert_eq!(transport.fallback_calls(), 1);
    }

    #[test]
    fn join_url_handles_slashes() {
        let base = Url::parse("http://primary.local:8443/api/").unwrap();
        assert_eq!(join_url(&base, "/search"), "http://primary.local:8443/api/search");
        let bare = Url::parse("http://primary.local:8443").unwrap();
        assert_eq!(join_url(&bare, "search"), "http://primary.local:8443/search");
    }

    #[tokio::test]
    async fn binary_response_has_no_json_view() {
        let (primary, fallback) = bases();
        let docx = BackendResponse {
            status: 200,
            headers: HashMap::new(),
            body: ResponseBody::Binary(Bytes::from_static(b"PK\x03\x04")),
        };
        let transport = Arc::new(MockTransport::new(
            &primary,
            Ok(docx),
            Err(timeout_error()),
        ));
        let client = DualEndpointClient::with_transport(primary, fallback, transport);

        let response = client
            .call(CallSpec::post("/generate-resume").binary())
            .await
            .unwrap();
        assert!(response.json().is_none());
        assert!(matches!(response.body, ResponseBody::Binary(ref b) if b.len() == 4));
    }

    #[test]
    fn call_spec_builder() {
        let spec = CallSpec::post("/fetch-resume")
            .json(json!({"name": "jane"}))
            .header("X-Request-Source", "teams")
            .timeout(Duration::from_secs(10));
        assert_eq!(spec.method, Method::POST);
        assert_eq!(spec.path, "/fetch-resume");
        assert!(spec.body.is_some());
        assert_eq!(spec.headers.len(), 1);
        assert_eq!(spec.timeout, Some(Duration::from_secs(10)));
        assert!(!spec.binary);
    }
}
