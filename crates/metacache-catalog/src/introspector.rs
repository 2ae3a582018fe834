//! Static remote-schema introspector
//!
//! Serves predefined introspection responses keyed by URL without any
//! network access. Per-URL call counts make memoisation observable: a remote
//! schema whose invalidation token did not change must not be fetched again.

use crate::adapter::{FetchError, IntrospectionRequest, RemoteSchemaIntrospector};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Introspector returning canned responses
#[derive(Debug, Clone, Default)]
pub struct StaticIntrospector {
    payloads: Arc<RwLock<HashMap<String, serde_json::Value>>>,
    errors: Arc<RwLock<HashMap<String, FetchError>>>,
    calls: Arc<RwLock<HashMap<String, usize>>>,
    latency_ms: u64,
}

impl StaticIntrospector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an introspector from responses keyed by URL
    pub fn from_payloads(payloads: impl IntoIterator<Item = (String, serde_json::Value)>) -> Self {
        Self {
            payloads: Arc::new(RwLock::new(payloads.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Serve `payload` for `url`, replacing any previous response or error
    pub async fn set_payload(&self, url: &str, payload: serde_json::Value) {
        self.errors.write().await.remove(url);
        self.payloads.write().await.insert(url.to_string(), payload);
    }

    /// Fail every fetch of `url` with `error`
    pub async fn set_error(&self, url: &str, error: FetchError) {
        self.errors.write().await.insert(url.to_string(), error);
    }

    pub async fn clear_error(&self, url: &str) {
        self.errors.write().await.remove(url);
    }

    /// Configure simulated latency for every fetch
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Number of fetches made for `url`
    pub async fn call_count(&self, url: &str) -> usize {
        self.calls.read().await.get(url).copied().unwrap_or(0)
    }

    /// Number of fetches made for any URL
    pub async fn total_calls(&self) -> usize {
        self.calls.read().await.values().sum()
    }
}

#[async_trait::async_trait]
impl RemoteSchemaIntrospector for StaticIntrospector {
    async fn introspect(
        &self,
        request: &IntrospectionRequest,
    ) -> Result<serde_json::Value, FetchError> {
        *self.calls.write().await.entry(request.url.clone()).or_insert(0) += 1;

        if self.latency_ms > 0 {
            let latency = std::time::Duration::from_millis(self.latency_ms);
            if latency > request.timeout {
                tokio::time::sleep(request.timeout).await;
                return Err(FetchError::Timeout {
                    url: request.url.clone(),
                    seconds: request.timeout.as_secs(),
                });
            }
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.errors.read().await.get(&request.url) {
            return Err(error.clone());
        }

        self.payloads
            .read()
            .await
            .get(&request.url)
            .cloned()
            .ok_or_else(|| {
                FetchError::NetworkError(format!("could not connect to {}", request.url))
            })
    }
}

/// Builder for a [`StaticIntrospector`] with predefined responses
#[derive(Debug, Default)]
pub struct StaticIntrospectorBuilder {
    payloads: HashMap<String, serde_json::Value>,
    errors: HashMap<String, FetchError>,
    latency_ms: u64,
}

impl StaticIntrospectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, url: &str, payload: serde_json::Value) -> Self {
        self.payloads.insert(url.to_string(), payload);
        self
    }

    pub fn with_error(mut self, url: &str, error: FetchError) -> Self {
        self.errors.insert(url.to_string(), error);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn build(self) -> StaticIntrospector {
        StaticIntrospector {
            payloads: Arc::new(RwLock::new(self.payloads)),
            errors: Arc::new(RwLock::new(self.errors)),
            calls: Arc::new(RwLock::new(HashMap::new())),
            latency_ms: self.latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn serves_payloads_and_counts_calls() {
        let introspector = StaticIntrospectorBuilder::new()
            .with_payload("http://countries.local", json!({"data": {}}))
            .build();
        let request = IntrospectionRequest::new("countries", "http://countries.local");

        assert!(introspector.introspect(&request).await.is_ok());
        assert!(introspector.introspect(&request).await.is_ok());
        assert_eq!(introspector.call_count("http://countries.local").await, 2);
        assert_eq!(introspector.call_count("http://other.local").await, 0);
    }

    #[tokio::test]
    async fn unknown_urls_are_network_errors() {
        let introspector = StaticIntrospector::new();
        let request = IntrospectionRequest::new("weather", "http://weather.local");
        let result = introspector.introspect(&request).await;
        assert!(matches!(result, Err(FetchError::NetworkError(_))));
        assert_eq!(introspector.total_calls().await, 1);
    }

    #[tokio::test]
    async fn injected_errors_win_until_cleared() {
        let introspector = StaticIntrospector::from_payloads([("http://a".to_string(), json!({}))]);
        introspector
            .set_error(
                "http://a",
                FetchError::HttpStatus { url: "http://a".to_string(), status: 502 },
            )
            .await;

        let request = IntrospectionRequest::new("a", "http://a");
        assert!(matches!(
            introspector.introspect(&request).await,
            Err(FetchError::HttpStatus { status: 502, .. })
        ));

        introspector.clear_error("http://a").await;
        assert!(introspector.introspect(&request).await.is_ok());
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let introspector = StaticIntrospectorBuilder::new()
            .with_payload("http://slow", json!({}))
            .with_latency(50)
            .build();
        let request =
            IntrospectionRequest::new("slow", "http://slow").with_timeout(Duration::from_millis(5));

        assert!(matches!(
            introspector.introspect(&request).await,
            Err(FetchError::Timeout { .. })
        ));
    }
}
