//! Shared reqwest plumbing: client construction from [`ClientConfig`] and
//! request/response logging extensions used by every adapter.

use reqwest::{Client, RequestBuilder};

use crate::config::ClientConfig;
use crate::error::Error;

/// Build the reqwest client a provider adapter will hold for its lifetime.
pub fn build_http_client(config: &ClientConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(proxy_url) = &config.proxy {
        if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(proxy);
        }
    }

    builder.build()
}

/// Attach the caller's extra headers, after the adapter's own.
pub fn add_extra_headers(mut request: RequestBuilder, config: &ClientConfig) -> RequestBuilder {
    for (key, value) in &config.extra_headers {
        request = request.header(key, value);
    }
    request
}

/// Attaches a JSON body while logging it at debug level.
pub trait RequestBuilderExt {
    fn json_logged<T: serde::Serialize + ?Sized>(self, json: &T) -> Self;
}

impl RequestBuilderExt for RequestBuilder {
    fn json_logged<T: serde::Serialize + ?Sized>(self, json: &T) -> Self {
        if let Ok(body) = serde_json::to_string_pretty(json) {
            tracing::debug!(bytes = body.len(), "vendor request body:\n{}", body);
        }

        self.json(json)
    }
}

/// Body readers that log what the vendor sent before handing it back.
/// Both consume the response.
#[async_trait::async_trait]
pub trait ResponseExt {
    async fn text_logged(self) -> Result<String, reqwest::Error>;

    async fn json_logged<T: serde::de::DeserializeOwned>(self) -> Result<T, Error>;
}

#[async_trait::async_trait]
impl ResponseExt for reqwest::Response {
    async fn text_logged(self) -> Result<String, reqwest::Error> {
        let text = self.text().await?;
        tracing::debug!(bytes = text.len(), "vendor response body:\n{}", text);
        Ok(text)
    }

    async fn json_logged<T: serde::de::DeserializeOwned>(self) -> Result<T, Error> {
        let bytes = self.bytes().await?;

        if let Ok(text) = std::str::from_utf8(&bytes) {
            tracing::debug!(bytes = text.len(), "vendor response body:\n{}", text);
        }

        serde_json::from_slice(&bytes).map_err(Error::from)
    }
}
