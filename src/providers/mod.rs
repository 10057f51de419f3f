//! Provider adapters for the supported vendors.
//!
//! Each submodule owns the full wire translation for one vendor: request
//! encoding, response decoding, error normalization and stream handling.
//! Azure and DeepSeek reuse the OpenAI-compatible adapter with their own
//! routing and authentication.

mod anthropic;
mod azure;
mod deepseek;
mod gemini;
mod openai;

pub use anthropic::Anthropic;
pub use azure::{AzureConfig, AzureOpenAi};
pub use deepseek::DeepSeek;
pub use gemini::Gemini;
pub use openai::{CompatVendor, OpenAi, OpenAiCompatibleClient};

use serde::{Deserialize, Serialize};

/// Identifies which vendor produced a response or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Azure,
    Anthropic,
    Gemini,
    DeepSeek,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Azure => "azure",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gemini => "gemini",
            ProviderId::DeepSeek => "deepseek",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
