//! Anthropic Messages API client implementation.
//!
//! The Messages API differs from the Chat Completions dialect in three ways
//! that matter here: system text rides a top-level field, tool results go
//! back as `tool_result` blocks on a user message, and streams are typed
//! frames (`message_start` through `message_stop`) instead of uniform deltas.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use serde_with::skip_serializing_none;

use crate::aggregate::{derive_finish_reason, StreamAggregator};
use crate::client::{ChatClient, EventStream};
use crate::config::ClientConfig;
use crate::error::{ApiError, Error};
use crate::http::{add_extra_headers, build_http_client, RequestBuilderExt, ResponseExt};
use crate::model::{
    ChatRequest, ChatResponse, ContentBlock, FinishReason, Message, MessageContent, Role,
    StreamEvent, ToolChoice, Usage,
};
use crate::providers::openai::handle_error_response;
use crate::providers::ProviderId;
use crate::sse::SseResponseExt;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The API requires `max_tokens`; this is the fallback when the caller sets
/// none.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct Anthropic {
    config: ClientConfig,
    http: reqwest::Client,
}

impl Anthropic {
    /// Create an Anthropic client.
    pub fn create(config: ClientConfig) -> Result<Self, Error> {
        let http = build_http_client(&config)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|_| Error::Config("Invalid API key".to_string()))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn send(&self, body: &MessagesRequest) -> Result<reqwest::Response, Error> {
        let url = format!("{}/messages", self.config.base_url_or(ANTHROPIC_BASE_URL));

        let mut req = self.http.post(&url).headers(self.headers()?);
        req = add_extra_headers(req, &self.config);

        let response = req.json_logged(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text_logged().await.unwrap_or_default();
            return Err(handle_error_response(ProviderId::Anthropic, status, &body));
        }
        Ok(response)
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> Result<MessagesRequest, Error> {
        let model = request
            .model
            .clone()
            .or_else(|| self.config.model.clone())
            .ok_or_else(|| Error::Config("model must be specified".to_string()))?;

        let generation = request.generation.clone().unwrap_or_default();
        let (system, messages) = convert_messages(&request.messages);

        Ok(MessagesRequest {
            model,
            messages,
            max_tokens: generation.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: generation.temperature,
            top_p: generation.top_p,
            top_k: generation.top_k,
            stop_sequences: generation.stop_sequences,
            stream: if stream { Some(true) } else { None },
            tools: request
                .tools
                .iter()
                .map(|def| ToolParam {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    input_schema: def.parameters.clone(),
                })
                .collect(),
            tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
            provider_config: request.provider_config.clone(),
        })
    }

    fn parse_response(&self, raw: Value) -> Result<ChatResponse, Error> {
        let parsed: MessagesResponse = serde_json::from_value(raw.clone())?;

        let mut blocks = Vec::new();
        for block in parsed.content {
            match block {
                ResponseBlock::Text { text } => blocks.push(ContentBlock::Text { text }),
                ResponseBlock::ToolUse { id, name, input } => {
                    blocks.push(ContentBlock::ToolUse { id, name, input })
                }
                ResponseBlock::Thinking {
                    thinking,
                    signature,
                } => blocks.push(ContentBlock::Reasoning {
                    text: thinking,
                    signature,
                }),
                ResponseBlock::Unknown => {}
            }
        }

        let message = Message::new(Role::Assistant, MessageContent::Blocks(blocks));
        let finish_reason = derive_finish_reason(
            message.has_tool_calls(),
            parsed.stop_reason.as_deref().and_then(map_stop_reason),
        );

        Ok(ChatResponse {
            id: parsed.id,
            model: parsed.model,
            provider: ProviderId::Anthropic,
            message,
            usage: parsed.usage.map(|u| Usage::from(u).totaled()),
            finish_reason,
            created_at: Utc::now(),
            raw: Some(raw),
        })
    }
}

#[async_trait]
impl ChatClient for Anthropic {
    fn provider(&self) -> ProviderId {
        ProviderId::Anthropic
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

        Ok(Box::pin(try_stream! {
            let mut aggregator = StreamAggregator::new(ProviderId::Anthropic);
            let mut sse = Box::pin(response.sse());
            let mut ended_with_error = false;

            while let Some(event) = sse.next().await {
                let event = event?;
                if event.data.is_empty() {
                    continue;
                }
                let frame: StreamFrame = serde_json::from_str(&event.data)?;
                match translate_frame(&mut aggregator, frame) {
                    StreamStep::Emit(events) => {
                        for out in events {
                            yield out;
                        }
                    }
                    StreamStep::End(error_event) => {
                        if let Some(out) = error_event {
                            ended_with_error = true;
                            yield out;
                        }
                        break;
                    }
                }
            }

            if !ended_with_error {
                yield StreamEvent::stop(aggregator.finish());
            }
        }))
    }
}

/// What one frame does to the stream: emit events, or end it (optionally
/// with a final error event).
enum StreamStep {
    Emit(Vec<StreamEvent>),
    End(Option<StreamEvent>),
}

fn translate_frame(aggregator: &mut StreamAggregator, frame: StreamFrame) -> StreamStep {
    let mut events = Vec::new();
    match frame {
        StreamFrame::MessageStart { message } => {
            events.extend(aggregator.begin(message.id.as_deref(), message.model.as_deref()));
            if let Some(usage) = message.usage {
                aggregator.merge_usage(usage.into());
            }
        }
        StreamFrame::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            StartBlock::Text { text } => {
                if !text.is_empty() {
                    events.push(aggregator.push_text(index, &text));
                }
            }
            StartBlock::ToolUse { id, name, input } => {
                aggregator.start_tool_call(index, Some(&id), Some(&name));
                // Arguments normally arrive as input_json_delta fragments;
                // a pre-filled input appears only when the call is complete
                // in one frame.
                if input.as_object().is_some_and(|map| !map.is_empty()) {
                    aggregator.push_tool_arguments(index, &input.to_string());
                }
            }
            StartBlock::Thinking { thinking } => {
                if !thinking.is_empty() {
                    aggregator.push_reasoning(index, &thinking);
                }
            }
            StartBlock::Unknown => {}
        },
        StreamFrame::ContentBlockDelta { index, delta } => match delta {
            FrameDelta::TextDelta { text } => events.push(aggregator.push_text(index, &text)),
            FrameDelta::InputJsonDelta { partial_json } => {
                aggregator.push_tool_arguments(index, &partial_json)
            }
            FrameDelta::ThinkingDelta { thinking } => aggregator.push_reasoning(index, &thinking),
            FrameDelta::SignatureDelta { signature } => {
                aggregator.set_reasoning_signature(index, &signature)
            }
            FrameDelta::Unknown => {}
        },
        StreamFrame::ContentBlockStop => {}
        StreamFrame::MessageDelta { delta, usage } => {
            if let Some(delta) = delta {
                aggregator.set_finish(delta.stop_reason.as_deref().and_then(map_stop_reason));
            }
            if let Some(usage) = usage {
                aggregator.merge_usage(usage.into());
            }
        }
        StreamFrame::MessageStop => return StreamStep::End(None),
        StreamFrame::Ping => {}
        StreamFrame::Error { error } => {
            let api = ApiError::new(
                ProviderId::Anthropic,
                None,
                Some(error.error_type),
                error.message,
                None,
            );
            return StreamStep::End(Some(StreamEvent::error(api)));
        }
        StreamFrame::Unknown => {}
    }
    StreamStep::Emit(events)
}

fn map_stop_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
        "max_tokens" => Some(FinishReason::Length),
        "tool_use" => Some(FinishReason::ToolCalls),
        "refusal" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({ "type": "auto" }),
        ToolChoice::None => json!({ "type": "none" }),
        ToolChoice::Required => json!({ "type": "any" }),
        ToolChoice::Tool { name } => json!({ "type": "tool", "name": name }),
    }
}

/// Split unified messages into the system prompt and the wire message list.
///
/// System and developer text is joined into the top-level `system` field;
/// tool-role messages become user messages of `tool_result` blocks.
fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<MessageParam>) {
    let mut system: Option<String> = None;
    let mut wire = Vec::new();

    for message in messages {
        match message.role {
            Role::System | Role::Developer => {
                let content = message.text();
                if !content.is_empty() {
                    if let Some(sys) = &mut system {
                        sys.push('\n');
                        sys.push_str(&content);
                    } else {
                        system = Some(content);
                    }
                }
            }
            Role::Tool | Role::Function => {
                let content: Vec<ContentParam> = message
                    .content
                    .to_blocks()
                    .into_iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            is_error,
                            content,
                        } => Some(ContentParam::ToolResult {
                            tool_use_id,
                            content: result_text(&content),
                            is_error,
                        }),
                        _ => None,
                    })
                    .collect();
                if !content.is_empty() {
                    wire.push(MessageParam {
                        role: "user".to_string(),
                        content,
                    });
                }
            }
            Role::User | Role::Assistant => {
                let role = if message.role == Role::User {
                    "user"
                } else {
                    "assistant"
                };
                let content = convert_blocks(message.content.to_blocks());
                if !content.is_empty() {
                    wire.push(MessageParam {
                        role: role.to_string(),
                        content,
                    });
                }
            }
        }
    }

    (system, wire)
}

fn result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn convert_blocks(blocks: Vec<ContentBlock>) -> Vec<ContentParam> {
    let mut params = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => params.push(ContentParam::Text { text }),
            ContentBlock::Image { data, mime_type } => params.push(ContentParam::Image {
                source: MediaSource::base64(mime_type, data),
            }),
            ContentBlock::File { data, mime_type, .. } => params.push(ContentParam::Document {
                source: MediaSource::base64(mime_type, data),
            }),
            // The Messages API has no audio or video envelope.
            ContentBlock::Audio { .. } => params.push(ContentParam::Text {
                text: "[audio content not supported]".to_string(),
            }),
            ContentBlock::Video { .. } => params.push(ContentParam::Text {
                text: "[video content not supported]".to_string(),
            }),
            ContentBlock::ToolUse { id, name, input } => {
                params.push(ContentParam::ToolUse { id, name, input })
            }
            // Thinking blocks are replayed with their signature so the API
            // accepts the assistant turn they came from.
            ContentBlock::Reasoning { text, signature } => params.push(ContentParam::Thinking {
                thinking: text,
                signature,
            }),
            ContentBlock::ToolResult { .. } => {}
        }
    }
    params
}

// --- Request Types ---

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<MessageParam>,
    max_tokens: u32,
    system: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    stop_sequences: Option<Vec<String>>,
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolParam>,
    tool_choice: Option<Value>,
    #[serde(flatten)]
    provider_config: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: String,
    content: Vec<ContentParam>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentParam {
    Text {
        text: String,
    },
    Image {
        source: MediaSource,
    },
    Document {
        source: MediaSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
struct MediaSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

impl MediaSource {
    fn base64(media_type: String, data: String) -> Self {
        Self {
            source_type: "base64".to_string(),
            media_type,
            data,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct ToolParam {
    name: String,
    description: Option<String>,
    input_schema: Value,
}

// --- Response Types ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    model: Option<String>,
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
}

impl From<MessagesUsage> for Usage {
    fn from(usage: MessagesUsage) -> Self {
        Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: None,
            cache_creation_tokens: usage.cache_creation_input_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            reasoning_tokens: None,
        }
    }
}

// --- Streaming Types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: FrameDelta,
    },
    ContentBlockStop,
    MessageDelta {
        delta: Option<StopDelta>,
        usage: Option<MessagesUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    id: Option<String>,
    model: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FrameDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    SignatureDelta {
        signature: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct StopDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
