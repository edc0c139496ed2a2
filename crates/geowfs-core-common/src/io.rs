//! Transport traits for talking to WFS endpoints.
//!
//! The driver never opens connections itself. Every request goes through a [`Fetcher`], which
//! owns connection handling, TLS, timeouts and retries. The driver treats any failure as an
//! opaque [`TransportError`].

use bytes::Bytes;
use thiserror::Error;

/// A single request issued by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Full request URL, query string included.
    pub url: String,
    /// Body of a POST request. `None` means GET.
    pub post_body: Option<String>,
}

impl FetchRequest {
    /// Creates a GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            post_body: None,
        }
    }

    /// Creates a POST request with an XML body.
    #[must_use]
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            post_body: Some(body.into()),
        }
    }

    /// Returns `true` for POST requests.
    #[must_use]
    pub fn is_post(&self) -> bool {
        self.post_body.is_some()
    }
}

/// Raw response returned by a [`Fetcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    /// `Content-Type` header, when the transport knows it.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Bytes,
}

impl FetchResponse {
    /// Creates a response without a content type.
    #[must_use]
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            content_type: None,
            body: body.into(),
        }
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Errors reported by a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing answers at this URL.
    #[error("No response available for {url}")]
    NotFound {
        /// The requested URL
        url: String,
    },

    /// The server answered with an HTTP error status.
    #[error("HTTP error code {status} returned for {url}")]
    Status {
        /// The requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The request could not be completed.
    #[error("Request to {url} failed: {message}")]
    Failed {
        /// The requested URL
        url: String,
        /// Description from the underlying client
        message: String,
    },
}

/// Trait for issuing WFS requests.
///
/// Implementations must be usable from several layers of the same datasource, hence the
/// `&self` receiver and the `Send + Sync` bound.
pub trait Fetcher: Send + Sync {
    /// Issues `request` and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no response could be obtained.
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

impl<F: Fetcher + ?Sized> Fetcher for std::sync::Arc<F> {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        (**self).fetch(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_constructors() {
        let get = FetchRequest::get("http://x?a=b");
        assert!(!get.is_post());
        let post = FetchRequest::post("http://x", "<a/>");
        assert!(post.is_post());
        assert_eq!(post.post_body.as_deref(), Some("<a/>"));
    }

    #[test]
    fn response_builder() {
        let response = FetchResponse::new("{}").with_content_type("application/json");
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.body.as_ref(), b"{}");
    }

    #[test]
    fn transport_error_messages() {
        let err = TransportError::Status {
            url: "http://x".into(),
            status: 500,
        };
        assert_eq!(err.to_string(), "HTTP error code 500 returned for http://x");
    }
}
