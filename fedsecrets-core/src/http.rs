use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("fedsecrets/", env!("CARGO_PKG_VERSION"));

/// Shared async HTTP client for the identity endpoint, the token endpoint
/// and the secret store. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct Http {
    client: Client,
}

impl Http {
    /// Builds a client with the provided timeout and rustls TLS stack.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn get(&self, url: Url) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post(&self, url: Url) -> RequestBuilder {
        self.client.post(url)
    }
}
