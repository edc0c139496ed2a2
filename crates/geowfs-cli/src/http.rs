//! HTTP transport over a blocking `reqwest` client.

use bytes::Bytes;
use geowfs_core_common::{FetchRequest, FetchResponse, Fetcher, TransportError};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Issues driver requests over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

fn failed(url: &str, err: &reqwest::Error) -> TransportError {
    TransportError::Failed {
        url: url.to_string(),
        message: err.to_string(),
    }
}

impl HttpFetcher {
    /// Creates a fetcher identifying itself as `geowfs/<version>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("geowfs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let url = request.url.as_str();
        let builder = match &request.post_body {
            Some(body) => {
                debug!("POST {url} ({} bytes)", body.len());
                self.client
                    .post(url)
                    .header(CONTENT_TYPE, "application/xml")
                    .body(body.clone())
            },
            None => self.client.get(url),
        };
        let response = builder.send().map_err(|err| failed(url, &err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body: Bytes = response.bytes().map_err(|err| failed(url, &err))?;
        debug!("{url}: {} bytes, content type {content_type:?}", body.len());

        Ok(FetchResponse { content_type, body })
    }
}
