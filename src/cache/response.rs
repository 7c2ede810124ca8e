//! Response-level memoization for axum handlers
//!
//! Successful responses (status below 400) are stored as status, headers and
//! UTF-8 body under `magic_cache_response_<View>_<method>[_<key>]`, using the
//! same single-flight engine as `MagicCacheData`.

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use super::magic::{Computed, MagicEngine, Policy};
use super::keys;

/// Largest body that will be buffered for caching
const MAX_CACHED_BODY: usize = 8 * 1024 * 1024;

/// Definition of one response-cached view
#[derive(Clone, Copy)]
pub struct ResponseCacheSpec {
    pub view: &'static str,
    pub timeout: Duration,
    pub invalid_time: Duration,
}

impl ResponseCacheSpec {
    pub const fn new(view: &'static str, timeout: Duration) -> Self {
        Self {
            view,
            timeout,
            invalid_time: Duration::ZERO,
        }
    }

    pub const fn with_invalid_time(mut self, invalid_time: Duration) -> Self {
        self.invalid_time = invalid_time;
        self
    }

    fn policy(&self) -> Policy {
        Policy {
            timeout: self.timeout,
            invalid_time: self.invalid_time,
            timeout_func: None,
        }
    }
}

/// Stored form of a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CachedResponse {
    fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Option<Self> {
        if status.as_u16() >= 400 {
            return None;
        }
        let body = std::str::from_utf8(body).ok()?.to_string();
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Some(Self {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    fn rebuild(self) -> Option<Response> {
        let status = StatusCode::from_u16(self.status).ok()?;
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.append(name, value);
            }
        }
        Some(response)
    }
}

/// Memoizes whole handler responses
#[derive(Clone)]
pub struct MagicCacheResponse {
    engine: MagicEngine,
}

impl MagicCacheResponse {
    pub fn with_engine(engine: MagicEngine) -> Self {
        Self { engine }
    }

    /// Serve `handler` through the cache.
    ///
    /// With `no_cache` the handler runs directly and nothing is stored.
    pub async fn cache_response<F, Fut>(
        &self,
        spec: &ResponseCacheSpec,
        method: &Method,
        key: Option<&str>,
        no_cache: bool,
        handler: F,
    ) -> Response
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response>,
    {
        if no_cache {
            return handler().await;
        }

        let method = method.as_str().to_ascii_lowercase();
        let cache_key = keys::magic_response_key(spec.view, &method, key);
        let decode = |raw: Value| {
            serde_json::from_value::<CachedResponse>(raw)
                .ok()
                .and_then(CachedResponse::rebuild)
        };
        let result = self
            .engine
            .resolve(&cache_key, &spec.policy(), false, decode, || async {
                let (parts, body) = handler().await.into_parts();
                let bytes = match to_bytes(body, MAX_CACHED_BODY).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!("Failed to buffer response of {}: {}", spec.view, e);
                        return Ok::<_, Infallible>(Computed {
                            value: StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                            cached: None,
                        });
                    }
                };
                let cached = CachedResponse::capture(parts.status, &parts.headers, &bytes)
                    .and_then(|c| serde_json::to_value(c).ok());
                Ok(Computed {
                    value: Response::from_parts(parts, Body::from(bytes)),
                    cached,
                })
            })
            .await;
        match result {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    /// Delete entries by key part or pattern, relative to `magic_cache_response_`
    pub async fn invalid_cache(&self, pattern: &str) -> usize {
        let full = format!("{}_{}", keys::MAGIC_RESPONSE_PREFIX, pattern);
        match self.engine.invalidate(&full).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Failed to invalidate {}: {}", full, e);
                0
            }
        }
    }
}
