//! The provider-independent client trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Error;
use crate::model::{ChatRequest, ChatResponse, StreamEvent};
use crate::providers::ProviderId;

/// A pinned, boxed stream of unified stream events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// Main client trait every provider adapter implements.
///
/// `chat` resolves to one complete, normalized response; `stream` yields the
/// same turn incrementally as [`StreamEvent`]s ending in a `Stop` event that
/// carries the assembled response. Both take the same [`ChatRequest`].
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Which vendor this client talks to.
    fn provider(&self) -> ProviderId;

    /// Send a request and wait for the complete response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, Error>;

    /// Send a request and stream the response incrementally.
    async fn stream(&self, request: ChatRequest) -> Result<EventStream, Error>;
}

#[async_trait]
impl ChatClient for Box<dyn ChatClient> {
    fn provider(&self) -> ProviderId {
        (**self).provider()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        (**self).chat(request).await
    }

    async fn stream(&self, request: ChatRequest) -> Result<EventStream, Error> {
        (**self).stream(request).await
    }
}
