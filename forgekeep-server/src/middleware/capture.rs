//! Response buffering shared by the cache and proxy layers.
//!
//! Both layers need to see a downstream response in full before deciding
//! whether to persist, replay, or discard it. [`CapturedResponse`] is that
//! buffered form: status, headers, and the complete body, replayable any
//! number of times.

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;

use crate::error::{AppError, AppResult};

/// A fully buffered response.
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedResponse {
    /// Drain a response into its buffered form.
    pub async fn capture(response: Response) -> AppResult<Self> {
        let (parts, body) = response.into_parts();
        let body = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| AppError::InternalError(format!("failed to buffer response: {}", e)))?;
        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Replay the captured response. Body bytes are shared, not copied.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
