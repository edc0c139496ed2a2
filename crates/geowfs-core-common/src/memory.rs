//! In-memory transport.
//!
//! Responses are registered against exact request keys. A GET is keyed by its URL, a POST by
//! `{url}&POSTFIELDS={body}`, which makes assertions on the full wire text of Transaction
//! documents straightforward. Every request is logged so tests can check what was (or was not)
//! sent.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use log::debug;

use crate::io::{FetchRequest, FetchResponse, Fetcher, TransportError};

/// A [`Fetcher`] answering from a preloaded table.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    responses: Mutex<HashMap<String, FetchResponse>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl MemoryFetcher {
    /// Creates an empty fetcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Key under which a request is looked up.
    #[must_use]
    pub fn key_for(request: &FetchRequest) -> String {
        match &request.post_body {
            Some(body) => format!("{}&POSTFIELDS={body}", request.url),
            None => request.url.clone(),
        }
    }

    /// Registers a response for a GET URL (or a full POST key).
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.insert_response(key, FetchResponse::new(body));
    }

    /// Registers a response with an explicit content type.
    pub fn insert_response(&self, key: impl Into<String>, response: FetchResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), response);
    }

    /// Registers a response for a POST request.
    pub fn insert_post(&self, url: &str, post_body: &str, body: impl Into<Bytes>) {
        let key = Self::key_for(&FetchRequest::post(url, post_body));
        self.insert(key, body);
    }

    /// Removes a registered response.
    pub fn remove(&self, key: &str) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Snapshot of all requests issued so far.
    #[must_use]
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// URLs of all requests issued so far.
    #[must_use]
    pub fn requested_urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    /// Forgets the request log.
    pub fn clear_requests(&self) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let key = Self::key_for(request);
        debug!("memory fetch {key}");
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or(TransportError::NotFound { url: key })
    }
}
