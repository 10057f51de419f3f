//! Client configuration shared by every provider adapter.

use std::collections::HashMap;
use std::time::Duration;

/// Connection and default-model settings for one provider client.
///
/// `base_url` overrides the adapter's default endpoint (useful for proxies
/// and compatible self-hosted gateways). `extra_headers` are attached to
/// every request after the adapter's own authentication headers.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
    pub proxy: Option<String>,
    pub extra_headers: HashMap<String, String>,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: None,
            timeout: None,
            proxy: None,
            extra_headers: HashMap::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    /// The endpoint to use: the override if set, otherwise the adapter's
    /// default, with any trailing slash trimmed.
    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_override_trims_trailing_slash() {
        let config = ClientConfig::new("key").with_base_url("https://proxy.example.com/v1/");
        assert_eq!(
            config.base_url_or("https://api.openai.com/v1"),
            "https://proxy.example.com/v1"
        );
    }

    #[test]
    fn test_base_url_default() {
        let config = ClientConfig::new("key");
        assert_eq!(
            config.base_url_or("https://api.openai.com/v1"),
            "https://api.openai.com/v1"
        );
    }
}
