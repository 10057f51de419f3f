//! OpenAI Chat Completions API client implementation.
//!
//! [`OpenAiCompatibleClient`] carries the full wire translation for the Chat
//! Completions dialect; [`CompatVendor`] supplies the per-vendor routing and
//! authentication so Azure and DeepSeek can reuse it unchanged.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use itertools::Itertools;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::aggregate::{derive_finish_reason, BlockIndexer, StreamAggregator};
use crate::client::{ChatClient, EventStream};
use crate::config::ClientConfig;
use crate::error::{ApiError, Error};
use crate::http::{add_extra_headers, build_http_client, RequestBuilderExt, ResponseExt};
use crate::model::{
    ChatRequest, ChatResponse, ContentBlock, FinishReason, Message, MessageContent,
    ResponseFormat, Role, StreamEvent, ToolChoice, Usage,
};
use crate::providers::ProviderId;
use crate::sse::SseResponseExt;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Routing and authentication for a vendor speaking the Chat Completions
/// dialect.
pub trait CompatVendor: Send + Sync {
    /// Which vendor this is, for response and error attribution.
    fn provider(&self) -> ProviderId;

    /// The full chat completions URL for this vendor.
    fn chat_url(&self, config: &ClientConfig) -> Result<String, Error>;

    /// Attach authentication. The default is a bearer token.
    fn apply_auth(&self, request: RequestBuilder, config: &ClientConfig) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Bearer {}", config.api_key))
    }
}

/// OpenAI itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiVendor;

impl CompatVendor for OpenAiVendor {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn chat_url(&self, config: &ClientConfig) -> Result<String, Error> {
        Ok(format!(
            "{}/chat/completions",
            config.base_url_or(OPENAI_BASE_URL)
        ))
    }
}

/// Client for the OpenAI API.
pub type OpenAi = OpenAiCompatibleClient<OpenAiVendor>;

impl OpenAi {
    /// Create an OpenAI client.
    pub fn create(config: ClientConfig) -> Result<Self, Error> {
        Self::with_vendor(OpenAiVendor, config)
    }
}

/// Generic client for OpenAI-compatible Chat Completions APIs.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient<V> {
    vendor: V,
    config: ClientConfig,
    http: reqwest::Client,
}

impl<V: CompatVendor> OpenAiCompatibleClient<V> {
    /// Create a client for any vendor speaking this dialect.
    pub fn with_vendor(vendor: V, config: ClientConfig) -> Result<Self, Error> {
        let http = build_http_client(&config)?;
        Ok(Self {
            vendor,
            config,
            http,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send(&self, body: &CompletionRequest) -> Result<reqwest::Response, Error> {
        let url = self.vendor.chat_url(&self.config)?;

        let mut req = self.http.post(&url).header(CONTENT_TYPE, "application/json");
        req = self.vendor.apply_auth(req, &self.config);
        req = add_extra_headers(req, &self.config);

        let response = req.json_logged(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text_logged().await.unwrap_or_default();
            return Err(handle_error_response(self.vendor.provider(), status, &body));
        }
        Ok(response)
    }

    fn build_request(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<CompletionRequest, Error> {
        let model = request
            .model
            .clone()
            .or_else(|| self.config.model.clone())
            .ok_or_else(|| Error::Config("model must be specified".to_string()))?;

        let generation = request.generation.clone().unwrap_or_default();
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|def| CompletionTool {
                        tool_type: "function".to_string(),
                        function: CompletionFunction {
                            name: def.name.clone(),
                            description: def.description.clone(),
                            parameters: def.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        Ok(CompletionRequest {
            model,
            messages: convert_messages(&request.messages),
            temperature: generation.temperature,
            top_p: generation.top_p,
            max_tokens: generation.max_tokens,
            stop: generation.stop_sequences,
            frequency_penalty: generation.frequency_penalty,
            presence_penalty: generation.presence_penalty,
            response_format: generation
                .response_format
                .as_ref()
                .map(convert_response_format),
            stream: if stream { Some(true) } else { None },
            stream_options: if stream {
                Some(StreamOptions {
                    include_usage: true,
                })
            } else {
                None
            },
            tools,
            tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
            provider_config: request.provider_config.clone(),
        })
    }

    fn parse_response(&self, raw: Value) -> Result<ChatResponse, Error> {
        let completion: CompletionResponse = serde_json::from_value(raw.clone())?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Protocol("response contained no choices".to_string()))?;

        let message = parse_message(choice.message);
        let finish_reason = derive_finish_reason(
            message.has_tool_calls(),
            choice.finish_reason.as_deref().and_then(map_finish_reason),
        );

        Ok(ChatResponse {
            id: completion
                .id
                .unwrap_or_else(|| format!("resp_{}", Uuid::new_v4().simple())),
            model: completion.model,
            provider: self.vendor.provider(),
            message,
            usage: completion.usage.map(|u| Usage::from(u).totaled()),
            finish_reason,
            created_at: completion
                .created
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now),
            raw: Some(raw),
        })
    }
}

#[async_trait]
impl<V: CompatVendor> ChatClient for OpenAiCompatibleClient<V> {
    fn provider(&self) -> ProviderId {
        self.vendor.provider()
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        let body = self.build_request(&request, false)?;
        let response = self.send(&body).await?;
        let raw: Value = response.json_logged().await?;
        self.parse_response(raw)
    }

    async fn stream(&self, request: ChatRequest) -> Result<EventStream, Error> {
        let body = self.build_request(&request, true)?;
        let response = self.send(&body).await?;
        let provider = self.vendor.provider();

        Ok(Box::pin(try_stream! {
            let mut aggregator = StreamAggregator::new(provider);
            let mut indexer = BlockIndexer::new();
            let mut sse = Box::pin(response.sse());

            while let Some(event) = sse.next().await {
                let event = event?;
                let chunk: CompletionChunk = serde_json::from_str(&event.data)?;
                for out in translate_chunk(&mut aggregator, &mut indexer, chunk) {
                    yield out;
                }
            }

            yield StreamEvent::stop(aggregator.finish());
        }))
    }
}

/// Fold one chunk into the aggregator, returning the events it produced.
fn translate_chunk(
    aggregator: &mut StreamAggregator,
    indexer: &mut BlockIndexer,
    chunk: CompletionChunk,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    events.extend(aggregator.begin(chunk.id.as_deref(), chunk.model.as_deref()));

    if let Some(usage) = chunk.usage {
        aggregator.merge_usage(usage.into());
    }

    for choice in chunk.choices.into_iter().flatten() {
        if let Some(delta) = choice.delta {
            if let Some(text) = delta.reasoning_content {
                if !text.is_empty() {
                    aggregator.push_reasoning(indexer.reasoning(), &text);
                }
            }
            if let Some(text) = delta.content {
                if !text.is_empty() {
                    events.push(aggregator.push_text(indexer.text(), &text));
                }
            }
            for (position, tool_call) in delta.tool_calls.into_iter().flatten().enumerate() {
                let call_index = tool_call.index.unwrap_or(position as u32);
                let index = indexer.tool(call_index);
                let (name, arguments) = match tool_call.function {
                    Some(function) => (function.name, function.arguments),
                    None => (None, None),
                };
                aggregator.start_tool_call(index, tool_call.id.as_deref(), name.as_deref());
                if let Some(fragment) = arguments {
                    aggregator.push_tool_arguments(index, &fragment);
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            aggregator.set_finish(map_finish_reason(&reason));
        }
    }
    events
}

/// Normalize an HTTP failure into the unified error shape.
///
/// The body's `error.code` (or `error.type`) is kept verbatim when present.
pub(crate) fn handle_error_response(
    provider: ProviderId,
    status: reqwest::StatusCode,
    body: &str,
) -> Error {
    let details = serde_json::from_str::<Value>(body).ok();
    let error_obj = details.as_ref().and_then(|value| value.get("error"));

    let message = error_obj
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            }
        });

    let code = error_obj
        .and_then(|error| error.get("code"))
        .and_then(|code| match code {
            Value::String(code) => Some(code.clone()),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        })
        .or_else(|| {
            error_obj
                .and_then(|error| error.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    Error::Api(ApiError::new(
        provider,
        Some(status.as_u16()),
        code,
        message,
        details,
    ))
}

fn map_finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "tool_calls" | "function_call" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

fn data_url(mime_type: &str, data: &str) -> String {
    format!("data:{};base64,{}", mime_type, data)
}

fn audio_format(mime_type: &str) -> String {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => "mp3".to_string(),
        "audio/wav" | "audio/x-wav" => "wav".to_string(),
        other => other.strip_prefix("audio/").unwrap_or(other).to_string(),
    }
}

fn convert_response_format(format: &ResponseFormat) -> Value {
    match format {
        ResponseFormat::JsonObject => json!({ "type": "json_object" }),
        ResponseFormat::JsonSchema { name, schema } => json!({
            "type": "json_schema",
            "json_schema": { "name": name, "schema": schema },
        }),
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

/// Convert unified messages to wire messages. Tool-result blocks fan out to
/// one `tool`-role message per result, keyed by `tool_call_id`.
fn convert_messages(messages: &[Message]) -> Vec<CompletionMessage> {
    let mut wire = Vec::new();
    for message in messages {
        match message.role {
            Role::Tool | Role::Function => {
                for block in message.content.to_blocks() {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        wire.push(CompletionMessage {
                            role: "tool".to_string(),
                            content: Some(CompletionContent::Text(result_text(&content))),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id),
                            reasoning_content: None,
                        });
                    }
                }
            }
            _ => wire.push(convert_message(message)),
        }
    }
    wire
}

fn result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn convert_message(message: &Message) -> CompletionMessage {
    let role = match message.role {
        // System and developer instructions both go out as `system`; every
        // vendor on this dialect accepts it.
        Role::System | Role::Developer => "system",
        Role::User => "user",
        _ => "assistant",
    };

    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in message.content.to_blocks() {
        match block {
            ContentBlock::Text { text } => parts.push(CompletionPart::Text { text }),
            ContentBlock::Image { data, mime_type } => parts.push(CompletionPart::ImageUrl {
                image_url: ImageUrl {
                    url: data_url(&mime_type, &data),
                },
            }),
            ContentBlock::Audio { data, mime_type } => parts.push(CompletionPart::InputAudio {
                input_audio: InputAudio {
                    data,
                    format: audio_format(&mime_type),
                },
            }),
            // This dialect has no video envelope.
            ContentBlock::Video { .. } => parts.push(CompletionPart::Text {
                text: "[video content not supported]".to_string(),
            }),
            ContentBlock::File {
                data,
                mime_type,
                name,
            } => parts.push(CompletionPart::File {
                file: FileData {
                    filename: name,
                    file_data: data_url(&mime_type, &data),
                },
            }),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(CompletionToolCall {
                id,
                tool_type: "function".to_string(),
                function: CompletionFunctionCall {
                    name,
                    arguments: match input {
                        Value::String(arguments) => arguments,
                        other => other.to_string(),
                    },
                },
            }),
            // Tool results only appear on tool-role messages; reasoning is
            // not replayed on this wire.
            ContentBlock::ToolResult { .. } | ContentBlock::Reasoning { .. } => {}
        }
    }

    let content = if parts.is_empty() {
        None
    } else if parts
        .iter()
        .all(|part| matches!(part, CompletionPart::Text { .. }))
    {
        let text = parts
            .iter()
            .filter_map(|part| match part {
                CompletionPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .join("\n");
        Some(CompletionContent::Text(text))
    } else {
        Some(CompletionContent::Parts(parts))
    };

    CompletionMessage {
        role: role.to_string(),
        content,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
        reasoning_content: None,
    }
}

fn parse_message(message: CompletionMessage) -> Message {
    let mut blocks = Vec::new();

    if let Some(text) = message.reasoning_content {
        if !text.is_empty() {
            blocks.push(ContentBlock::Reasoning {
                text,
                signature: None,
            });
        }
    }

    match message.content {
        Some(CompletionContent::Text(text)) => {
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text });
            }
        }
        Some(CompletionContent::Parts(parts)) => {
            for part in parts {
                if let CompletionPart::Text { text } = part {
                    blocks.push(ContentBlock::Text { text });
                }
            }
        }
        None => {}
    }

    for call in message.tool_calls.into_iter().flatten() {
        blocks.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input: parse_arguments(&call.function.arguments),
        });
    }

    Message::new(Role::Assistant, MessageContent::Blocks(blocks))
}

/// Tool arguments arrive as a JSON-encoded string; anything that does not
/// parse becomes `{}` so a malformed call still reaches the tool loop.
fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::Object(Map::new()))
}

// --- Chat Completions API Types ---

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<CompletionMessage>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    stop: Option<Vec<String>>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
    response_format: Option<Value>,
    stream: Option<bool>,
    stream_options: Option<StreamOptions>,
    tools: Option<Vec<CompletionTool>>,
    tool_choice: Option<Value>,
    #[serde(flatten)]
    provider_config: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompletionMessage {
    role: String,
    content: Option<CompletionContent>,
    tool_calls: Option<Vec<CompletionToolCall>>,
    tool_call_id: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum CompletionContent {
    Text(String),
    Parts(Vec<CompletionPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CompletionPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
    File { file: FileData },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InputAudio {
    data: String,
    format: String,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileData {
    filename: Option<String>,
    file_data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompletionToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: CompletionFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompletionFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct CompletionTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: CompletionFunction,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
struct CompletionFunction {
    name: String,
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionResponse {
    id: Option<String>,
    model: Option<String>,
    created: Option<i64>,
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
    prompt_tokens_details: Option<PromptTokensDetails>,
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Clone, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionTokensDetails {
    reasoning_tokens: Option<u32>,
}

impl From<CompletionUsage> for Usage {
    fn from(usage: CompletionUsage) -> Self {
        Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cache_creation_tokens: None,
            cache_read_tokens: usage
                .prompt_tokens_details
                .and_then(|details| details.cached_tokens),
            reasoning_tokens: usage
                .completion_tokens_details
                .and_then(|details| details.reasoning_tokens),
        }
    }
}

// --- Streaming Types ---

#[derive(Debug, Clone, Deserialize)]
struct CompletionChunk {
    id: Option<String>,
    model: Option<String>,
    choices: Option<Vec<ChunkChoice>>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCallDelta {
    index: Option<u32>,
    id: Option<String>,
    function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionCallDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StreamDelta, StreamEventType, ToolDefinition};

    fn client() -> OpenAi {
        OpenAi::create(ClientConfig::new("test-key").with_model("gpt-4o")).unwrap()
    }

    #[test]
    fn test_build_request_requires_model() {
        let client = OpenAi::create(ClientConfig::new("test-key")).unwrap();
        let err = client
            .build_request(&ChatRequest::new(vec![Message::user("hi")]), false)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_request_model_overrides_config() {
        let body = client()
            .build_request(
                &ChatRequest::new(vec![Message::user("hi")]).with_model("gpt-4o-mini"),
                false,
            )
            .unwrap();
        assert_eq!(body.model, "gpt-4o-mini");
        assert!(body.stream.is_none());
        assert!(body.stream_options.is_none());
    }

    #[test]
    fn test_stream_request_asks_for_usage() {
        let body = client()
            .build_request(&ChatRequest::new(vec![Message::user("hi")]), true)
            .unwrap();
        assert_eq!(body.stream, Some(true));
        assert!(body.stream_options.is_some());
    }

    #[test]
    fn test_tool_results_fan_out() {
        let message = Message::tool_results(vec![
            ContentBlock::ToolResult {
                tool_use_id: "call_1".to_string(),
                is_error: false,
                content: json!({"temp": 21}),
            },
            ContentBlock::ToolResult {
                tool_use_id: "call_2".to_string(),
                is_error: true,
                content: json!({"ok": false, "error": "boom"}),
            },
        ]);
        let wire = convert_messages(&[message]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(wire[1].tool_call_id.as_deref(), Some("call_2"));
        match &wire[1].content {
            Some(CompletionContent::Text(text)) => {
                assert!(text.contains("boom"));
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_assistant_tool_calls_encoded_as_strings() {
        let message = Message::assistant_blocks(vec![ContentBlock::ToolUse {
            id: "call_1".to_string(),
            name: "weather".to_string(),
            input: json!({"city": "Oslo"}),
        }]);
        let wire = convert_messages(&[message]);
        let calls = wire[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"Oslo\"}");
        assert!(wire[0].content.is_none());
    }

    #[test]
    fn test_media_becomes_parts() {
        let message = Message::user_blocks(vec![
            ContentBlock::text("look"),
            ContentBlock::Image {
                data: "YWJj".to_string(),
                mime_type: "image/png".to_string(),
            },
        ]);
        let wire = convert_messages(&[message]);
        match &wire[0].content {
            Some(CompletionContent::Parts(parts)) => {
                assert_eq!(parts.len(), 2);
                match &parts[1] {
                    CompletionPart::ImageUrl { image_url } => {
                        assert_eq!(image_url.url, "data:image/png;base64,YWJj");
                    }
                    other => panic!("unexpected part: {:?}", other),
                }
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_developer_sent_as_system() {
        let wire = convert_messages(&[Message::developer("be terse")]);
        assert_eq!(wire[0].role, "system");
    }

    #[test]
    fn test_tool_definitions_on_request() {
        let body = client()
            .build_request(
                &ChatRequest::new(vec![Message::user("hi")]).with_tools(vec![
                    ToolDefinition::new("weather", json!({"type": "object"}))
                        .with_description("look up weather"),
                ]),
                false,
            )
            .unwrap();
        let tools = body.tools.unwrap();
        assert_eq!(tools[0].tool_type, "function");
        assert_eq!(tools[0].function.name, "weather");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let raw = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "created": 1736000000,
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "weather", "arguments": "{\"city\": \"Oslo\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let response = client().parse_response(raw).unwrap();
        assert_eq!(response.id, "chatcmpl-1");
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"city": "Oslo"}));
        assert_eq!(response.usage.unwrap().total_tokens, Some(15));
        assert!(response.raw.is_some());
    }

    #[test]
    fn test_parse_response_derives_tool_calls_finish() {
        let raw = json!({
            "id": "chatcmpl-2",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "weather", "arguments": ""}
                    }]
                },
                "finish_reason": "stop"
            }]
        });
        let response = client().parse_response(raw).unwrap();
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.tool_calls()[0].arguments, json!({}));
    }

    #[test]
    fn test_parse_response_without_choices_is_protocol_error() {
        let err = client().parse_response(json!({"choices": []})).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_reasoning_content_kept_out_of_text() {
        let raw = json!({
            "id": "chatcmpl-3",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "4",
                    "reasoning_content": "2 + 2 is 4"
                },
                "finish_reason": "stop"
            }]
        });
        let response = client().parse_response(raw).unwrap();
        assert_eq!(response.text(), "4");
        let blocks = response.message.content.to_blocks();
        assert!(matches!(blocks[0], ContentBlock::Reasoning { .. }));
    }

    #[test]
    fn test_unknown_finish_reason_maps_to_none() {
        assert_eq!(map_finish_reason("whatever"), None);
        assert_eq!(map_finish_reason("length"), Some(FinishReason::Length));
        assert_eq!(
            map_finish_reason("function_call"),
            Some(FinishReason::ToolCalls)
        );
    }

    #[test]
    fn test_error_response_with_envelope() {
        let err = handle_error_response(
            ProviderId::OpenAi,
            reqwest::StatusCode::UNAUTHORIZED,
            "{\"error\": {\"message\": \"bad key\", \"type\": \"invalid_request_error\", \"code\": \"invalid_api_key\"}}",
        );
        match err {
            Error::Api(api) => {
                assert_eq!(api.code, "invalid_api_key");
                assert_eq!(api.message, "bad key");
                assert_eq!(api.status, Some(401));
                assert_eq!(api.kind, crate::error::ErrorKind::Authentication);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_response_without_envelope() {
        let err = handle_error_response(
            ProviderId::DeepSeek,
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream exploded",
        );
        match err {
            Error::Api(api) => {
                assert_eq!(api.code, "deepseek_error");
                assert_eq!(api.message, "upstream exploded");
                assert_eq!(api.kind, crate::error::ErrorKind::ServerError);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_translate_chunks_assembles_interleaved_items() {
        let mut aggregator = StreamAggregator::new(ProviderId::OpenAi);
        let mut indexer = BlockIndexer::new();
        let mut events = Vec::new();

        let frames = vec![
            json!({"id": "chatcmpl-4", "model": "gpt-4o", "choices": [{"delta": {"content": "Hello"}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "weather", "arguments": "{\"ci"}}]}}]}),
            json!({"choices": [{"delta": {"content": " there"}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "ty\": \"Oslo\"}"}}]}, "finish_reason": "tool_calls"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 3}}),
        ];
        for frame in frames {
            let chunk: CompletionChunk = serde_json::from_value(frame).unwrap();
            events.extend(translate_chunk(&mut aggregator, &mut indexer, chunk));
        }

        assert_eq!(events[0].event_type, StreamEventType::Start);
        let text: String = events
            .iter()
            .filter_map(|event| match &event.delta {
                Some(StreamDelta::Text { text }) => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello there");

        let response = aggregator.finish();
        assert_eq!(response.id, "chatcmpl-4");
        assert_eq!(response.text(), "Hello there");
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        let calls = response.tool_calls();
        assert_eq!(calls[0].name, "weather");
        assert_eq!(calls[0].arguments, json!({"city": "Oslo"}));
        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, Some(7));
        assert_eq!(usage.total_tokens, Some(10));
    }
}
