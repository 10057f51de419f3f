//! # unichat - One Chat API Across LLM Vendors
//!
//! A provider-agnostic chat client: one message model, one request shape,
//! and one streaming event taxonomy over OpenAI, Anthropic, Google Gemini,
//! Azure-hosted OpenAI, and DeepSeek.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - `chat` and `stream` through one [`ChatClient`] trait per vendor
//! - Unified content blocks: text, media, tool calls, tool results, reasoning
//! - Streaming over Server-Sent Events with a uniform event shape
//! - [`Agent`] loop executing local tools and MCP server tools
//! - Serializable [`Thread`] for conversation persistence
//!
//! ## Architecture
//!
//! 1. **Clients** (`OpenAi`, `Anthropic`, ...) hold configuration and talk
//!    the vendor dialect, translating to and from the unified model.
//! 2. **[`Agent`]** wraps a client with a tool registry and drives the
//!    call / execute / append loop.
//! 3. **[`Thread`]** owns conversation history and survives serialization.
//!
//! ## Example
//! ```no_run
//! use unichat::{Agent, ClientConfig, Message, OpenAi, Thread};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenAi::create(
//!         ClientConfig::new(std::env::var("OPENAI_API_KEY")?).with_model("gpt-4o-mini"),
//!     )?;
//!     let agent = Agent::new(client);
//!
//!     let mut thread = Thread::new();
//!     let response = agent
//!         .chat(&mut thread, vec![Message::user("Hello!")])
//!         .await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod model;
pub mod providers;
pub mod registry;
pub mod sse;
pub mod thread;
pub mod tools;

pub use agent::Agent;
pub use client::{ChatClient, EventStream};
pub use config::ClientConfig;
pub use error::{ApiError, Error, ErrorKind};
pub use mcp::{McpClient, McpServer};
pub use model::{
    ChatRequest, ChatResponse, ContentBlock, FinishReason, GenerationConfig, Message,
    MessageContent, ResponseFormat, Role, StreamDelta, StreamEvent, StreamEventType, ToolCall,
    ToolChoice, ToolDefinition, ToolOutput, Usage,
};
pub use providers::{
    Anthropic, AzureConfig, AzureOpenAi, CompatVendor, DeepSeek, Gemini, OpenAi,
    OpenAiCompatibleClient, ProviderId,
};
pub use registry::{ToolOutcome, ToolRegistry};
pub use thread::Thread;
pub use tools::{Tool, ToolError, ToolHandler};

// Re-export rmcp so MCP handlers can be written against the same version.
pub use rmcp;
