//! The unified chat model every provider adapter translates to and from.
//!
//! Vendors disagree on roles, content layout, tool envelopes and token
//! accounting; everything in this module is the single neutral vocabulary the
//! rest of the crate speaks. Adapters own the lossy edges.

use base64::Engine;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::error::ApiError;
use crate::providers::ProviderId;

/// Conversation roles. `Function` is the legacy OpenAI spelling of `Tool`;
/// `Developer` is the OpenAI system-message successor. Adapters map roles a
/// vendor does not know onto the nearest supported one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Function,
    Developer,
}

/// Message content: either a bare string or an ordered list of typed blocks.
/// The two forms are equivalent for plain text; adapters normalize with
/// [`MessageContent::to_blocks`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// The bare string, if this is the string form.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(_) => None,
        }
    }

    /// Concatenated text across all text blocks (or the bare string).
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .join(""),
        }
    }

    /// Normalized block view: the string form becomes a single text block.
    pub fn to_blocks(&self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::Text { text: text.clone() }],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

/// One typed segment of message content.
///
/// Media payloads (`Image`, `Audio`, `Video`, `File`) carry base64 data plus
/// a MIME type; adapters re-encode them into whatever envelope the vendor
/// wants, or degrade them to a visible placeholder when the vendor has none.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        mime_type: String,
    },
    Audio {
        data: String,
        mime_type: String,
    },
    Video {
        data: String,
        mime_type: String,
    },
    File {
        data: String,
        mime_type: String,
        name: Option<String>,
    },
    /// A tool invocation raised by the model. `id` is the pairing key the
    /// matching `ToolResult` must echo.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: bool,
        content: Value,
    },
    /// Model reasoning output. `signature` is an opaque vendor token some
    /// providers require when the block is replayed.
    Reasoning {
        text: String,
        signature: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Image block from raw bytes; the payload is base64-encoded here.
    pub fn image_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        ContentBlock::Image {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    /// File block from raw bytes; the payload is base64-encoded here.
    pub fn file_bytes(bytes: &[u8], mime_type: impl Into<String>, name: Option<String>) -> Self {
        ContentBlock::File {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
            name,
        }
    }
}

/// A single conversation message.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub metadata: Option<Map<String, Value>>,
}

fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: new_message_id(),
            role,
            content,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    pub fn developer(text: impl Into<String>) -> Self {
        Self::new(Role::Developer, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::User, MessageContent::Blocks(blocks))
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, MessageContent::Blocks(blocks))
    }

    /// A tool-role message carrying the results of an executed turn.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::Tool, MessageContent::Blocks(blocks))
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Every tool invocation raised in this message, in block order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .to_blocks()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    name,
                    call_id: id,
                    arguments: input,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .any(|block| matches!(block, ContentBlock::ToolUse { .. })),
        }
    }
}

/// A tool the model may call, advertised with a JSON Schema for its input.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters,
        }
    }

    /// Derive the parameter schema from a Rust input type.
    pub fn from_schema<T: schemars::JsonSchema>(name: impl Into<String>) -> Self {
        let schema = schemars::schema_for!(T);
        Self {
            name: name.into(),
            description: None,
            parameters: serde_json::to_value(schema)
                .unwrap_or_else(|_| Value::Object(Map::new())),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Sampling and output constraints, applied best-effort per vendor: fields a
/// vendor does not support are dropped, never errored on.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub response_format: Option<ResponseFormat>,
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = Some(stop_sequences);
        self
    }
}

/// Structured-output request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
    JsonSchema { name: String, schema: Value },
}

/// How the model may use the advertised tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool { name: String },
}

/// The provider-independent request both `chat` and `stream` accept.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Overrides the client's configured model when set.
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub generation: Option<GenerationConfig>,
    /// Extra vendor fields flattened into the wire request body verbatim.
    pub provider_config: Option<Map<String, Value>>,
    /// Continuation token for providers with server-held conversation state.
    /// Stateless adapters carry it but do not consume it.
    pub previous_response_id: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_provider_config(mut self, config: Map<String, Value>) -> Self {
        self.provider_config = Some(config);
        self
    }
}

/// Token accounting, unified across vendors. All fields optional: a vendor
/// reports what it reports.
#[skip_serializing_none]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub cache_creation_tokens: Option<u32>,
    pub cache_read_tokens: Option<u32>,
    pub reasoning_tokens: Option<u32>,
}

fn add_counts(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (None, None) => None,
        _ => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

impl Usage {
    /// Fill `total_tokens` from input + output when the vendor omitted it.
    pub fn totaled(mut self) -> Self {
        if self.total_tokens.is_none() {
            self.total_tokens = add_counts(self.input_tokens, self.output_tokens);
        }
        self
    }

    /// Overlay newer counters onto this one; `Some` fields win.
    pub fn merge(&mut self, newer: Usage) {
        self.input_tokens = newer.input_tokens.or(self.input_tokens);
        self.output_tokens = newer.output_tokens.or(self.output_tokens);
        self.total_tokens = newer.total_tokens.or(self.total_tokens);
        self.cache_creation_tokens = newer.cache_creation_tokens.or(self.cache_creation_tokens);
        self.cache_read_tokens = newer.cache_read_tokens.or(self.cache_read_tokens);
        self.reasoning_tokens = newer.reasoning_tokens.or(self.reasoning_tokens);
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: add_counts(self.input_tokens, rhs.input_tokens),
            output_tokens: add_counts(self.output_tokens, rhs.output_tokens),
            total_tokens: add_counts(self.total_tokens, rhs.total_tokens),
            cache_creation_tokens: add_counts(self.cache_creation_tokens, rhs.cache_creation_tokens),
            cache_read_tokens: add_counts(self.cache_read_tokens, rhs.cache_read_tokens),
            reasoning_tokens: add_counts(self.reasoning_tokens, rhs.reasoning_tokens),
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

/// Why the model stopped. Vendor values outside this closed set map to
/// `None` on the response, never to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// The complete, normalized outcome of one model turn.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: Option<String>,
    pub provider: ProviderId,
    pub message: Message,
    pub usage: Option<Usage>,
    pub finish_reason: Option<FinishReason>,
    pub created_at: DateTime<Utc>,
    /// The vendor's response body as received, for callers that need fields
    /// the unified model does not carry. Not populated on streamed turns.
    pub raw: Option<Value>,
}

impl ChatResponse {
    /// Concatenated text of the assistant message.
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.message.tool_calls()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }
}

/// A raised tool invocation in dispatchable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub arguments: Value,
}

/// The result of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub name: String,
    pub call_id: String,
    pub output: Value,
}

impl ToolOutput {
    /// Convert into the `tool_result` block the next request carries.
    pub fn into_result_block(self, is_error: bool) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.call_id,
            is_error,
            content: self.output,
        }
    }
}

/// What kind of stream event this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    Start,
    TextDelta,
    Stop,
    Error,
}

/// Incremental payload carried by a stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    Text { text: String },
    Error { error: ApiError },
}

/// One event of a streamed turn.
///
/// `output_index` identifies which output item a delta belongs to, so
/// interleaved items can be reassembled. `response` is populated on `Stop`
/// with the fully assembled turn, including any `tool_use` blocks.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: StreamEventType,
    #[serde(default)]
    pub output_index: usize,
    pub delta: Option<StreamDelta>,
    pub response: Option<ChatResponse>,
}

impl StreamEvent {
    pub fn start() -> Self {
        Self {
            event_type: StreamEventType::Start,
            output_index: 0,
            delta: None,
            response: None,
        }
    }

    pub fn text_delta(output_index: usize, text: impl Into<String>) -> Self {
        Self {
            event_type: StreamEventType::TextDelta,
            output_index,
            delta: Some(StreamDelta::Text { text: text.into() }),
            response: None,
        }
    }

    pub fn stop(response: ChatResponse) -> Self {
        Self {
            event_type: StreamEventType::Stop,
            output_index: 0,
            delta: None,
            response: Some(response),
        }
    }

    pub fn error(error: ApiError) -> Self {
        Self {
            event_type: StreamEventType::Error,
            output_index: 0,
            delta: Some(StreamDelta::Error { error }),
            response: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serde_names() {
        assert_eq!(serde_json::to_string(&Role::Developer).unwrap(), "\"developer\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
        let role: Role = serde_json::from_str("\"function\"").unwrap();
        assert_eq!(role, Role::Function);
    }

    #[test]
    fn test_content_untagged_forms() {
        let text: MessageContent = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(text.as_text(), Some("hello"));

        let blocks: MessageContent =
            serde_json::from_value(json!([{ "type": "text", "text": "hi" }])).unwrap();
        assert_eq!(blocks.text(), "hi");
        assert_eq!(blocks.to_blocks().len(), 1);
    }

    #[test]
    fn test_tool_result_error_flag_defaults_false() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_result",
            "tool_use_id": "call_1",
            "content": {"ok": true}
        }))
        .unwrap();
        match block {
            ContentBlock::ToolResult { is_error, .. } => assert!(!is_error),
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[test]
    fn test_message_text_joins_text_blocks_only() {
        let msg = Message::assistant_blocks(vec![
            ContentBlock::text("a"),
            ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "lookup".to_string(),
                input: json!({}),
            },
            ContentBlock::text("b"),
        ]);
        assert_eq!(msg.text(), "ab");
        assert!(msg.has_tool_calls());
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_id, "call_1");
    }

    #[test]
    fn test_usage_add_and_total() {
        let a = Usage {
            input_tokens: Some(10),
            output_tokens: Some(5),
            ..Default::default()
        };
        let b = Usage {
            input_tokens: Some(3),
            reasoning_tokens: Some(7),
            ..Default::default()
        };
        let sum = (a + b).totaled();
        assert_eq!(sum.input_tokens, Some(13));
        assert_eq!(sum.output_tokens, Some(5));
        assert_eq!(sum.total_tokens, Some(18));
        assert_eq!(sum.reasoning_tokens, Some(7));
        assert_eq!(sum.cache_read_tokens, None);
    }

    #[test]
    fn test_usage_merge_prefers_newer() {
        let mut usage = Usage {
            input_tokens: Some(10),
            output_tokens: None,
            ..Default::default()
        };
        usage.merge(Usage {
            output_tokens: Some(4),
            ..Default::default()
        });
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(4));
    }

    #[test]
    fn test_image_bytes_encodes_base64() {
        let block = ContentBlock::image_bytes(b"abc", "image/png");
        match block {
            ContentBlock::Image { data, mime_type } => {
                assert_eq!(data, "YWJj");
                assert_eq!(mime_type, "image/png");
            }
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[test]
    fn test_message_serde_round_trip() {
        let msg = Message::user_blocks(vec![
            ContentBlock::text("look at this"),
            ContentBlock::Image {
                data: "YWJj".to_string(),
                mime_type: "image/png".to_string(),
            },
        ]);
        let json = serde_json::to_value(&msg).unwrap();
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_tool_definition_from_schema() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct Args {
            city: String,
        }
        let def = ToolDefinition::from_schema::<Args>("weather").with_description("look up weather");
        assert_eq!(def.name, "weather");
        assert!(def.parameters["properties"]["city"].is_object());
    }
}
