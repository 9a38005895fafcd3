//! Provider client implementation

use courier_config::HttpConfig;
use courier_resilience::{redact, ExecutionError, RequestExecutor, RetryPolicy};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::HttpError;
use crate::types::HttpMethod;

/// How much provider error text survives into surfaced errors
const ERROR_BODY_LIMIT: usize = 2048;

/// One request to an external provider
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl ProviderRequest {
    /// GET request to `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// POST request to `url` with a JSON body
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::new(),
            body: Some(body),
        }
    }

    /// Attach a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn mock_key(&self) -> String {
        format!("{}:{}", self.method.as_str(), self.url)
    }
}

/// Parsed provider response
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Value,
}

/// A scripted response for offline mode
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: Value,
}

impl MockResponse {
    /// 200 response with a JSON body
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Error response with the given status
    pub fn status(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

/// HTTP client for external research providers
///
/// Every call runs through the shared [`RequestExecutor`] under the provider
/// name as resource key, so admission limits, retries, and backoff apply
/// uniformly. In offline mode, responses come from scripted mock sequences
/// keyed by `METHOD:URL`; the last response in a sequence repeats.
pub struct ProviderClient {
    client: reqwest::Client,
    executor: Arc<RequestExecutor>,
    offline: bool,
    mocks: Mutex<HashMap<String, VecDeque<MockResponse>>>,
}

impl ProviderClient {
    /// Create a client from HTTP configuration
    pub fn new(config: &HttpConfig, executor: Arc<RequestExecutor>) -> Result<Self, HttpError> {
        debug!(timeout_secs = config.timeout.as_secs(), "creating provider client");
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ));
        if let Some(ref proxy) = config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            executor,
            offline: false,
            mocks: Mutex::new(HashMap::new()),
        })
    }

    /// Switch to offline mode; requests are served from mocks only
    pub fn set_offline(&mut self) {
        self.offline = true;
        debug!("provider client set to offline mode");
    }

    /// Queue a scripted response for `method` + `url`
    pub fn push_mock(&self, method: HttpMethod, url: &str, response: MockResponse) {
        let key = format!("{}:{}", method.as_str(), url);
        self.mocks.lock().entry(key).or_default().push_back(response);
    }

    /// Remaining scripted responses for `method` + `url`
    pub fn remaining_mocks(&self, method: HttpMethod, url: &str) -> usize {
        let key = format!("{}:{}", method.as_str(), url);
        self.mocks.lock().get(&key).map(VecDeque::len).unwrap_or(0)
    }

    /// Call a provider with retry and admission control
    ///
    /// `provider` is the resource key partitioning limiter and retry state
    /// (e.g. "openai", "grok").
    pub async fn call(
        &self,
        provider: &str,
        policy: &RetryPolicy,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ExecutionError<HttpError>> {
        info!(provider, method = %request.method, url = %request.url, "provider call");
        self.executor
            .execute(provider, policy, || self.send_once(request))
            .await
    }

    /// One attempt against the provider, no retry
    async fn send_once(&self, request: &ProviderRequest) -> Result<ProviderResponse, HttpError> {
        if self.offline {
            return self.mock_response(request);
        }

        let mut builder = self
            .client
            .request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), url = %request.url, "provider error response");
            return Err(HttpError::Status {
                status: status.as_u16(),
                body: sanitize_error_body(&text),
            });
        }

        // Non-JSON bodies are kept verbatim as a JSON string
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(ProviderResponse {
            status: status.as_u16(),
            body,
        })
    }

    fn mock_response(&self, request: &ProviderRequest) -> Result<ProviderResponse, HttpError> {
        let key = request.mock_key();
        let mock = {
            let mut mocks = self.mocks.lock();
            let queue = mocks
                .get_mut(&key)
                .ok_or_else(|| HttpError::NoMock(key.clone()))?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
            .ok_or_else(|| HttpError::NoMock(key.clone()))?
        };

        if (200..300).contains(&mock.status) {
            Ok(ProviderResponse {
                status: mock.status,
                body: mock.body,
            })
        } else {
            let text = match mock.body {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Err(HttpError::Status {
                status: mock.status,
                body: sanitize_error_body(&text),
            })
        }
    }
}

/// Redact credentials and cap the length of provider error text
fn sanitize_error_body(text: &str) -> String {
    let mut body = redact(text);
    if body.len() > ERROR_BODY_LIMIT {
        let mut end = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
