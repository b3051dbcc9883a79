//! Transport contract for backend services.
//!
//! [`Fetcher`] is the seam between the pipeline and the network: the engine
//! only ever asks for "the payload at this URL". [`HttpFetcher`] implements it
//! with `reqwest`, a per-call timeout and a bounded number of attempts.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use das_api::DasClient;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{async_runtime::block_on_future, redact_sensitive};

/// Failure of a single fetch after all attempts were spent.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("invalid request for {url}: {message}")]
    InvalidRequest { url: String, message: String },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16, body: String },

    #[error("runtime error while fetching {url}: {message}")]
    Runtime { url: String, message: String },
}

impl FetchError {
    /// Response body delivered alongside an unsuccessful status, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            FetchError::Status { body, .. } if !body.trim().is_empty() => Some(body.as_str()),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::InvalidRequest { .. } | FetchError::Runtime { .. } => false,
        }
    }
}

/// Attempt budget and timing applied to every network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts per URL (at least one is always made).
    pub attempts: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(300),
            backoff: Duration::from_millis(100),
        }
    }
}

/// Fetches raw service payloads.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, POSTing `args` as a JSON body when present.
    async fn fetch(&self, url: &str, args: Option<&Value>) -> Result<String, FetchError>;

    /// Blocking form of [`Fetcher::fetch`] for synchronous callers.
    fn fetch_blocking(&self, url: &str, args: Option<&Value>) -> Result<String, FetchError> {
        block_on_future(self.fetch(url, args)).map_err(|error| FetchError::Runtime {
            url: url.to_string(),
            message: error.to_string(),
        })?
    }
}

/// `reqwest`-backed [`Fetcher`] with bounded retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: DasClient,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(policy: RetryPolicy, user_agent: Option<&str>) -> anyhow::Result<Self> {
        let client = DasClient::new(policy.timeout, user_agent)?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn fetch_once(&self, url: &str, args: Option<&Value>) -> Result<String, FetchError> {
        let builder = self.client.request(url, args).map_err(|error| FetchError::InvalidRequest {
            url: url.to_string(),
            message: error.to_string(),
        })?;

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: self.policy.timeout.as_millis().try_into().unwrap_or(u64::MAX),
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    message: redact_sensitive(&error.to_string()),
                }
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        })?;

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, args: Option<&Value>) -> Result<String, FetchError> {
        let attempts = self.policy.attempts.max(1);
        let start = Instant::now();
        let mut attempt = 1;
        loop {
            match self.fetch_once(url, args).await {
                Ok(body) => {
                    debug!(
                        url = %url,
                        attempt,
                        body_len = body.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "fetch completed"
                    );
                    return Ok(body);
                }
                Err(error) if error.is_retryable() && attempt < attempts => {
                    warn!(url = %url, attempt, attempts, error = %error, "fetch attempt failed; retrying");
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(
                        url = %url,
                        attempt,
                        duration_ms = start.elapsed().as_millis() as u64,
                        error = %error,
                        "fetch failed"
                    );
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    struct CountingFetcher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, url: &str, _args: Option<&Value>) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{{\"url\": \"{url}\"}}"))
        }
    }

    #[test]
    fn fetch_blocking_runs_without_ambient_runtime() {
        let fetcher = CountingFetcher { calls: AtomicU32::new(0) };
        let body = fetcher.fetch_blocking("http://localhost/a", None).unwrap();
        assert_eq!(body, "{\"url\": \"http://localhost/a\"}");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryable_errors() {
        let server = FetchError::Status {
            url: "u".into(),
            status: 503,
            body: String::new(),
        };
        let client = FetchError::Status {
            url: "u".into(),
            status: 404,
            body: "{\"error\": \"not found\"}".into(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert_eq!(client.body(), Some("{\"error\": \"not found\"}"));
        assert!(server.body().is_none());
    }

    #[tokio::test]
    async fn invalid_urls_fail_without_retrying() {
        let policy = RetryPolicy {
            attempts: 5,
            timeout: Duration::from_secs(1),
            backoff: Duration::from_millis(1),
        };
        let fetcher = HttpFetcher::new(policy, None).unwrap();
        let error = fetcher.fetch("not a url", None).await.unwrap_err();
        assert!(matches!(error, FetchError::InvalidRequest { .. }), "{error}");
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(1),
        }
    }

    /// Local server answering the n-th connection with `statuses[n]` (200 once
    /// exhausted). A status of 0 drops the connection without a response.
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/data", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let index = counter.fetch_add(1, Ordering::SeqCst) as usize;
                let status = statuses.get(index).copied().unwrap_or(200);
                let mut buffer = vec![0_u8; 4096];
                let _ = socket.read(&mut buffer).await;
                if status == 0 {
                    drop(socket);
                    continue;
                }
                let body = if status == 200 { r#"{"ok": true}"# } else { r#"{"error": "unavailable"}"# };
                let response = format!(
                    "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let (url, hits) = scripted_server(vec![503, 503]).await;
        let fetcher = HttpFetcher::new(policy(3), None).unwrap();
        let body = fetcher.fetch(&url, None).await.unwrap();
        assert_eq!(body, r#"{"ok": true}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_bound_the_number_of_calls() {
        let (url, hits) = scripted_server(vec![503; 5]).await;
        let fetcher = HttpFetcher::new(policy(2), None).unwrap();
        let error = fetcher.fetch(&url, None).await.unwrap_err();
        assert!(matches!(error, FetchError::Status { status: 503, .. }), "{error}");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_attempt_policy_never_retries() {
        let (url, hits) = scripted_server(vec![503]).await;
        let fetcher = HttpFetcher::new(policy(1), None).unwrap();
        assert!(fetcher.fetch(&url, None).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_errors_return_at_once_with_body() {
        let (url, hits) = scripted_server(vec![404]).await;
        let fetcher = HttpFetcher::new(policy(3), None).unwrap();
        let error = fetcher.fetch(&url, None).await.unwrap_err();
        assert!(matches!(error, FetchError::Status { status: 404, .. }), "{error}");
        assert_eq!(error.body(), Some(r#"{"error": "unavailable"}"#));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_connections_are_retried() {
        let (url, hits) = scripted_server(vec![0, 0]).await;
        let fetcher = HttpFetcher::new(policy(3), None).unwrap();
        assert_eq!(fetcher.fetch(&url, None).await.unwrap(), r#"{"ok": true}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
