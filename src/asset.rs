//! Asset fetching for overlay imagery.
//!
//! The load pipeline talks to the network through the [`AssetFetcher`]
//! boundary trait, which allows dependency injection and mock transports in
//! tests. [`ReqwestFetcher`] is the production implementation, and
//! [`CachingFetcher`] layers request deduplication on top of any fetcher:
//! at most one fetch is in flight per unique (url, headers) key, with the
//! result fanned out to every concurrent caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::Shared;
use futures::FutureExt;
use tracing::debug;

use crate::error::OverlayError;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A fetched asset: HTTP status plus body bytes.
///
/// Status handling is left to the caller so that overlay sources can decide
/// what a non-success response means for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub status: u16,
    pub data: Bytes,
}

/// Asynchronous asset transport boundary.
///
/// Implementations must be safe to share across tasks; the returned future
/// owns everything it needs so callers can spawn it freely.
pub trait AssetFetcher: Send + Sync {
    /// Performs a GET request for the given URL with the given headers.
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<AssetResponse, OverlayError>>;
}

/// Production fetcher backed by a shared reqwest client.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Creates a fetcher with a default 30 second request timeout.
    pub fn new() -> Result<Self, OverlayError> {
        Self::with_timeout(std::time::Duration::from_secs(30))
    }

    /// Creates a fetcher with a custom request timeout.
    pub fn with_timeout(timeout: std::time::Duration) -> Result<Self, OverlayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OverlayError::Transport {
                url: String::new(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

impl AssetFetcher for ReqwestFetcher {
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<AssetResponse, OverlayError>> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let url = url.to_string();

        Box::pin(async move {
            let response = request.send().await.map_err(|e| OverlayError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;

            let status = response.status().as_u16();
            let data = response.bytes().await.map_err(|e| OverlayError::Transport {
                url: url.clone(),
                message: format!("Failed to read response: {}", e),
            })?;

            Ok(AssetResponse { status, data })
        })
    }
}

/// Key identifying a unique fetch for deduplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AssetKey {
    url: String,
    headers: Vec<(String, String)>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<AssetResponse, OverlayError>>>;

/// Request-deduplicating fetcher.
///
/// Guarantees at most one in-flight fetch per unique (url, headers) key.
/// Concurrent callers for the same key await the same underlying request and
/// each receive a clone of its result. Completed entries are removed, so a
/// later request for the same key fetches again; persistent caching is the
/// job of an HTTP cache below the inner fetcher. Entries every caller
/// dropped before completion are swept on the next request.
pub struct CachingFetcher {
    inner: Arc<dyn AssetFetcher>,
    in_flight: Arc<DashMap<AssetKey, SharedFetch>>,
}

impl CachingFetcher {
    pub fn new(inner: Arc<dyn AssetFetcher>) -> Self {
        Self {
            inner,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Number of fetches currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl AssetFetcher for CachingFetcher {
    fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<AssetResponse, OverlayError>> {
        let key = AssetKey {
            url: url.to_string(),
            headers: headers.to_vec(),
        };

        // An entry only the map still references was abandoned by every
        // caller before completing and can never be polled again.
        self.in_flight
            .retain(|_, shared| shared.strong_count() != Some(1));

        let shared = match self.in_flight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                debug!(url = %key.url, "Coalescing in-flight asset request");
                existing.get().clone()
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let request = self.inner.get(&key.url, &key.headers);
                let in_flight = Arc::clone(&self.in_flight);
                let fetch: BoxFuture<'static, Result<AssetResponse, OverlayError>> =
                    Box::pin(async move {
                        let result = request.await;
                        in_flight.remove(&key);
                        result
                    });
                let shared = fetch.shared();
                vacant.insert(shared.clone());
                shared
            }
        };

        Box::pin(shared)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock fetcher serving canned responses and counting calls.
    pub struct MockFetcher {
        responses: HashMap<String, Result<AssetResponse, OverlayError>>,
        calls: AtomicUsize,
        gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self {
                responses: HashMap::new(),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        /// Makes every request wait for a permit before responding, so tests
        /// can hold responses in flight deliberately.
        pub fn gated(mut self, gate: Arc<tokio::sync::Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        pub fn with_response(mut self, url: &str, response: AssetResponse) -> Self {
            self.responses.insert(url.to_string(), Ok(response));
            self
        }

        pub fn with_error(mut self, url: &str, error: OverlayError) -> Self {
            self.responses.insert(url.to_string(), Err(error));
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AssetFetcher for MockFetcher {
        fn get(
            &self,
            url: &str,
            _headers: &[(String, String)],
        ) -> BoxFuture<'static, Result<AssetResponse, OverlayError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.responses.get(url).cloned().unwrap_or_else(|| {
                Err(OverlayError::Transport {
                    url: url.to_string(),
                    message: "no mock response configured".to_string(),
                })
            });
            let gate = self.gate.clone();
            Box::pin(async move {
                if let Some(gate) = gate {
                    let _permit = gate.acquire().await.expect("gate closed");
                }
                response
            })
        }
    }

    fn ok_response(data: &[u8]) -> AssetResponse {
        AssetResponse {
            status: 200,
            data: Bytes::copy_from_slice(data),
        }
    }

    #[tokio::test]
    async fn test_mock_fetcher_returns_configured_response() {
        let fetcher = MockFetcher::new().with_response("http://a", ok_response(b"abc"));
        let response = fetcher.get("http://a", &[]).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.data[..], b"abc");
    }

    #[tokio::test]
    async fn test_caching_fetcher_deduplicates_concurrent_requests() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let mock = Arc::new(
            MockFetcher::new()
                .gated(gate.clone())
                .with_response("http://a", ok_response(b"abc")),
        );
        let caching = CachingFetcher::new(mock.clone());

        let first = caching.get("http://a", &[]);
        let second = caching.get("http://a", &[]);
        assert_eq!(caching.in_flight_count(), 1);

        gate.add_permits(1);
        let (a, b) = futures::join!(first, second);
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(mock.call_count(), 1);
        assert_eq!(caching.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_caching_fetcher_distinct_keys_fetch_separately() {
        let mock = Arc::new(
            MockFetcher::new()
                .with_response("http://a", ok_response(b"a"))
                .with_response("http://b", ok_response(b"b")),
        );
        let caching = CachingFetcher::new(mock.clone());

        let a = caching.get("http://a", &[]).await.unwrap();
        let b = caching.get("http://b", &[]).await.unwrap();
        assert_eq!(&a.data[..], b"a");
        assert_eq!(&b.data[..], b"b");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_caching_fetcher_headers_are_part_of_key() {
        let mock = Arc::new(MockFetcher::new().with_response("http://a", ok_response(b"a")));
        let caching = CachingFetcher::new(mock.clone());

        let plain = caching.get("http://a", &[]).await.unwrap();
        let with_header = caching
            .get(
                "http://a",
                &[("accept".to_string(), "image/png".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(plain, with_header);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_caching_fetcher_refetches_after_completion() {
        let mock = Arc::new(MockFetcher::new().with_response("http://a", ok_response(b"a")));
        let caching = CachingFetcher::new(mock.clone());

        caching.get("http://a", &[]).await.unwrap();
        caching.get("http://a", &[]).await.unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_caching_fetcher_sweeps_abandoned_requests() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let mock = Arc::new(
            MockFetcher::new()
                .gated(gate.clone())
                .with_response("http://a", ok_response(b"a"))
                .with_response("http://b", ok_response(b"b")),
        );
        let caching = CachingFetcher::new(mock.clone());

        // Dropped before ever being polled: this fetch can no longer
        // complete and must not pin its map entry forever.
        drop(caching.get("http://a", &[]));
        assert_eq!(caching.in_flight_count(), 1);

        gate.add_permits(1);
        let fetch = caching.get("http://b", &[]);
        assert_eq!(caching.in_flight_count(), 1);
        fetch.await.unwrap();
        assert_eq!(caching.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_caching_fetcher_fans_out_errors() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let mock = Arc::new(
            MockFetcher::new().gated(gate.clone()).with_error(
                "http://broken",
                OverlayError::Transport {
                    url: "http://broken".to_string(),
                    message: "connection refused".to_string(),
                },
            ),
        );
        let caching = CachingFetcher::new(mock.clone());

        let first = caching.get("http://broken", &[]);
        let second = caching.get("http://broken", &[]);
        gate.add_permits(1);
        let (a, b) = futures::join!(first, second);
        assert!(a.is_err());
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(mock.call_count(), 1);
    }
}
