//! Azure OpenAI client implementation.
//!
//! Azure hosts OpenAI models behind per-resource endpoints and deployment
//! names, authenticated with an `api-key` header instead of a bearer token.
//! Everything on the wire is the Chat Completions dialect.

use reqwest::RequestBuilder;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::providers::openai::{CompatVendor, OpenAiCompatibleClient};
use crate::providers::ProviderId;

pub const AZURE_DEFAULT_API_VERSION: &str = "2024-10-21";

/// Azure deployment coordinates.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub resource_endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

impl AzureConfig {
    pub fn new(resource_endpoint: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            resource_endpoint: resource_endpoint.into(),
            deployment: deployment.into(),
            api_version: AZURE_DEFAULT_API_VERSION.to_string(),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct AzureVendor {
    azure: AzureConfig,
}

impl CompatVendor for AzureVendor {
    fn provider(&self) -> ProviderId {
        ProviderId::Azure
    }

    fn chat_url(&self, config: &ClientConfig) -> Result<String, Error> {
        let endpoint = config.base_url_or(&self.azure.resource_endpoint);
        Ok(format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint, self.azure.deployment, self.azure.api_version
        ))
    }

    fn apply_auth(&self, request: RequestBuilder, config: &ClientConfig) -> RequestBuilder {
        request.header("api-key", &config.api_key)
    }
}

/// Client for Azure-hosted OpenAI deployments.
pub type AzureOpenAi = OpenAiCompatibleClient<AzureVendor>;

impl AzureOpenAi {
    /// Create an Azure OpenAI client. The deployment name doubles as the
    /// model when the configuration does not set one.
    pub fn create(azure: AzureConfig, mut config: ClientConfig) -> Result<Self, Error> {
        if azure.resource_endpoint.trim().is_empty() {
            return Err(Error::Config(
                "Azure resource endpoint must be specified".to_string(),
            ));
        }
        if azure.deployment.trim().is_empty() {
            return Err(Error::Config(
                "Azure deployment must be specified".to_string(),
            ));
        }
        if config.model.is_none() {
            config.model = Some(azure.deployment.clone());
        }
        Self::with_vendor(AzureVendor { azure }, config)
    }
}
