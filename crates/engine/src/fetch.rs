//! Concurrent fetching of a query's network calls.
//!
//! Every deduplicated URL is fetched exactly once. A single call is awaited
//! inline; larger batches are spawned on a [`JoinSet`] and gathered until the
//! set of pending URLs is empty. Responses carry their URL so they can be
//! correlated back to a descriptor; arrival order is not preserved.

use std::sync::Arc;

use das_types::PendingRequest;
use das_util::{FetchError, Fetcher};
use indexmap::{IndexMap, IndexSet};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Raw outcome of one network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub url: String,
    /// Body as delivered by the service, including bodies of failed calls.
    pub payload: Option<String>,
    /// Transport or status failure, if any.
    pub error: Option<String>,
}

impl RawResponse {
    pub fn ok(url: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            payload: Some(payload.into()),
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>, payload: Option<String>) -> Self {
        Self {
            url: url.into(),
            payload,
            error: Some(error.into()),
        }
    }

    fn from_result(url: String, result: Result<String, FetchError>) -> Self {
        match result {
            Ok(payload) => Self::ok(url, payload),
            Err(error) => {
                let body = error.body().map(str::to_string);
                Self::failed(url, error.to_string(), body)
            }
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Scatter/gather over a shared [`Fetcher`].
#[derive(Clone)]
pub struct FetchCoordinator {
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator").finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches every distinct URL once and returns one response per URL.
    pub async fn fetch_all<'a, I>(&self, requests: I) -> Vec<RawResponse>
    where
        I: IntoIterator<Item = &'a PendingRequest>,
    {
        let mut unique: IndexMap<String, PendingRequest> = IndexMap::new();
        for request in requests {
            unique.entry(request.url.clone()).or_insert_with(|| request.clone());
        }

        match unique.len() {
            0 => Vec::new(),
            1 => {
                let Some((url, request)) = unique.into_iter().next() else {
                    return Vec::new();
                };
                debug!(url = %url, "fetching single request inline");
                let result = self.fetcher.fetch(&url, request.args.as_ref()).await;
                vec![RawResponse::from_result(url, result)]
            }
            _ => self.fetch_concurrently(unique).await,
        }
    }

    async fn fetch_concurrently(&self, requests: IndexMap<String, PendingRequest>) -> Vec<RawResponse> {
        let mut pending: IndexSet<String> = requests.keys().cloned().collect();
        let mut tasks = JoinSet::new();

        for (url, request) in requests {
            let fetcher = Arc::clone(&self.fetcher);
            tasks.spawn(async move {
                let result = fetcher.fetch(&url, request.args.as_ref()).await;
                RawResponse::from_result(url, result)
            });
        }
        debug!(request_count = pending.len(), "concurrent fetch started");

        let mut responses = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            match tasks.join_next().await {
                Some(Ok(response)) => {
                    pending.shift_remove(&response.url);
                    responses.push(response);
                }
                Some(Err(join_error)) => warn!(error = %join_error, "fetch task failed"),
                None => break,
            }
        }

        // Tasks that panicked or were cancelled never reported their URL.
        for url in pending {
            responses.push(RawResponse::failed(url, "fetch task did not complete", None));
        }
        debug!(response_count = responses.len(), "concurrent fetch finished");
        responses
    }
}
