//! DeepSeek API client implementation.
//!
//! DeepSeek speaks the Chat Completions dialect with one addition: reasoner
//! models return their chain of thought in `reasoning_content`, which the
//! shared adapter already maps to reasoning blocks.

use crate::config::ClientConfig;
use crate::error::Error;
use crate::providers::openai::{CompatVendor, OpenAiCompatibleClient};
use crate::providers::ProviderId;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

#[derive(Debug, Clone, Copy, Default)]
pub struct DeepSeekVendor;

impl CompatVendor for DeepSeekVendor {
    fn provider(&self) -> ProviderId {
        ProviderId::DeepSeek
    }

    fn chat_url(&self, config: &ClientConfig) -> Result<String, Error> {
        Ok(format!(
            "{}/chat/completions",
            config.base_url_or(DEEPSEEK_BASE_URL)
        ))
    }
}

/// Client for the DeepSeek API.
pub type DeepSeek = OpenAiCompatibleClient<DeepSeekVendor>;

impl DeepSeek {
    /// Create a DeepSeek client.
    pub fn create(config: ClientConfig) -> Result<Self, Error> {
        Self::with_vendor(DeepSeekVendor, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatClient;

    #[test]
    fn test_default_url() {
        let url = DeepSeekVendor
            .chat_url(&ClientConfig::new("key"))
            .unwrap();
        assert_eq!(url, "https://api.deepseek.com/chat/completions");
    }

    #[test]
    fn test_provider_attribution() {
        let client = DeepSeek::create(ClientConfig::new("key").with_model("deepseek-chat")).unwrap();
        assert_eq!(client.provider(), ProviderId::DeepSeek);
    }
}
