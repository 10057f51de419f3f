//! Google Gemini API client implementation.
//!
//! Talks to the `generateContent` / `streamGenerateContent` endpoints.
//! See: <https://ai.google.dev/api/rest>
//!
//! Gemini identifies function calls by name alone, so tool-use ids are
//! synthesized here and the original names are recovered from conversation
//! history when tool results are sent back.

use std::collections::HashMap;

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use nonempty::NonEmpty;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::aggregate::{derive_finish_reason, BlockIndexer, StreamAggregator};
use crate::client::{ChatClient, EventStream};
use crate::config::ClientConfig;
use crate::error::{ApiError, Error};
use crate::http::{add_extra_headers, build_http_client, RequestBuilderExt, ResponseExt};
use crate::model::{
    ChatRequest, ChatResponse, ContentBlock, FinishReason, GenerationConfig, Message,
    MessageContent, ResponseFormat, Role, StreamEvent, ToolChoice, Usage,
};
use crate::providers::ProviderId;
use crate::sse::SseResponseExt;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Google Gemini API.
#[derive(Debug, Clone)]
pub struct Gemini {
    config: ClientConfig,
    http: reqwest::Client,
}

impl Gemini {
    /// Create a Gemini client.
    pub fn create(config: ClientConfig) -> Result<Self, Error> {
        let http = build_http_client(&config)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, Error> {
        request
            .model
            .clone()
            .or_else(|| self.config.model.clone())
            .ok_or_else(|| Error::Config("model must be specified".to_string()))
    }

    fn request_url(&self, model: &str, stream: bool) -> String {
        let base = self.config.base_url_or(GEMINI_BASE_URL);
        if stream {
            // alt=sse switches the endpoint from JSON-array framing to SSE.
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                base, model, self.config.api_key
            )
        } else {
            format!(
                "{}/models/{}:generateContent?key={}",
                base, model, self.config.api_key
            )
        }
    }

    async fn send(&self, url: &str, body: &GeminiRequest) -> Result<reqwest::Response, Error> {
        let mut req = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json");
        req = add_extra_headers(req, &self.config);

        let response = req.json_logged(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text_logged().await.unwrap_or_default();
            return Err(handle_error_response(status, &body));
        }
        Ok(response)
    }

    fn parse_response(&self, raw: Value) -> Result<ChatResponse, Error> {
        let parsed: GeminiResponse = serde_json::from_value(raw.clone())?;
        // Only the first candidate is surfaced; additional candidates exist
        // solely when candidateCount > 1 is requested out-of-band.
        let candidate = parsed.candidates.head;

        let mut blocks = Vec::new();
        let parts = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default();
        for part in parts {
            match part {
                GeminiPart::Text { thought, text } => {
                    if thought.unwrap_or_default() {
                        blocks.push(ContentBlock::Reasoning {
                            text,
                            signature: None,
                        });
                    } else {
                        blocks.push(ContentBlock::Text { text });
                    }
                }
                GeminiPart::FunctionCall { function_call, .. } => {
                    blocks.push(ContentBlock::ToolUse {
                        id: new_call_id(),
                        name: function_call.name,
                        input: ensure_object(function_call.args),
                    });
                }
                GeminiPart::InlineData { inline_data } => blocks.push(media_block(inline_data)),
                GeminiPart::FunctionResponse { .. } => {}
            }
        }

        let message = Message::new(Role::Assistant, MessageContent::Blocks(blocks));
        let finish_reason = derive_finish_reason(
            message.has_tool_calls(),
            candidate.finish_reason.and_then(map_finish_reason),
        );

        Ok(ChatResponse {
            id: parsed
                .response_id
                .unwrap_or_else(|| format!("resp_{}", Uuid::new_v4().simple())),
            model: parsed.model_version,
            provider: ProviderId::Gemini,
            message,
            usage: parsed.usage_metadata.map(|meta| Usage::from(meta).totaled()),
            finish_reason,
            created_at: Utc::now(),
            raw: Some(raw),
        })
    }
}

#[async_trait]
impl ChatClient for Gemini {
    fn provider(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        let model = self.resolve_model(&request)?;
        let body = build_request(&request);
        let response = self.send(&self.request_url(&model, false), &body).await?;
        let raw: Value = response.json_logged().await?;
        self.parse_response(raw)
    }

    async fn stream(&self, request: ChatRequest) -> Result<EventStream, Error> {
        let model = self.resolve_model(&request)?;
        let body = build_request(&request);
        let response = self.send(&self.request_url(&model, true), &body).await?;

        Ok(Box::pin(try_stream! {
            let mut aggregator = StreamAggregator::new(ProviderId::Gemini);
            let mut indexer = BlockIndexer::new();
            let mut tool_count = 0u32;
            let mut sse = Box::pin(response.sse());
            let mut ended_with_error = false;

            while let Some(event) = sse.next().await {
                let event = event?;
                if event.data.is_empty() {
                    continue;
                }
                let chunk: GeminiChunk = serde_json::from_str(&event.data)?;
                if let Some(error) = chunk.error {
                    ended_with_error = true;
                    yield StreamEvent::error(stream_error(error));
                    break;
                }
                for out in translate_chunk(&mut aggregator, &mut indexer, &mut tool_count, chunk) {
                    yield out;
                }
            }

            if !ended_with_error {
                yield StreamEvent::stop(aggregator.finish());
            }
        }))
    }
}

/// Fold one chunk into the aggregator, returning the events it produced.
fn translate_chunk(
    aggregator: &mut StreamAggregator,
    indexer: &mut BlockIndexer,
    tool_count: &mut u32,
    chunk: GeminiChunk,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    events.extend(aggregator.begin(chunk.response_id.as_deref(), chunk.model_version.as_deref()));

    // usageMetadata is cumulative, so each merge supersedes the last.
    if let Some(usage) = chunk.usage_metadata {
        aggregator.merge_usage(usage.into());
    }

    for candidate in chunk.candidates.into_iter().flatten() {
        let parts = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default();
        for part in parts {
            match part {
                GeminiPart::Text { thought, text } => {
                    if thought.unwrap_or_default() {
                        aggregator.push_reasoning(indexer.reasoning(), &text);
                    } else {
                        events.push(aggregator.push_text(indexer.text(), &text));
                    }
                }
                GeminiPart::FunctionCall { function_call, .. } => {
                    // Function calls arrive whole, one part per call.
                    let index = indexer.tool(*tool_count);
                    *tool_count += 1;
                    let id = new_call_id();
                    aggregator.start_tool_call(index, Some(&id), Some(&function_call.name));
                    aggregator
                        .push_tool_arguments(index, &ensure_object(function_call.args).to_string());
                }
                GeminiPart::FunctionResponse { .. } | GeminiPart::InlineData { .. } => {}
            }
        }
        if let Some(reason) = candidate.finish_reason {
            aggregator.set_finish(map_finish_reason(reason));
        }
    }
    events
}

fn stream_error(error: GeminiErrorBody) -> ApiError {
    ApiError::new(
        ProviderId::Gemini,
        error.code.and_then(|code| u16::try_from(code).ok()),
        error.status,
        error
            .message
            .unwrap_or_else(|| "stream aborted by provider".to_string()),
        None,
    )
}

fn handle_error_response(status: reqwest::StatusCode, body: &str) -> Error {
    let details = serde_json::from_str::<Value>(body).ok();
    match serde_json::from_str::<GeminiErrorResponse>(body) {
        Ok(parsed) => {
            let message = parsed
                .error
                .message
                .unwrap_or_else(|| format!("HTTP {}", status));
            // The status string ("RESOURCE_EXHAUSTED", "INVALID_ARGUMENT")
            // is the stable identifier; the numeric code mirrors HTTP.
            Error::Api(ApiError::new(
                ProviderId::Gemini,
                Some(status.as_u16()),
                parsed.error.status,
                message,
                details,
            ))
        }
        Err(_) => {
            let message = if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            };
            Error::Api(ApiError::new(
                ProviderId::Gemini,
                Some(status.as_u16()),
                None,
                message,
                details,
            ))
        }
    }
}

fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

fn ensure_object(args: Value) -> Value {
    if args.is_null() {
        Value::Object(Map::new())
    } else {
        args
    }
}

fn media_block(inline_data: InlineData) -> ContentBlock {
    let InlineData { mime_type, data } = inline_data;
    if mime_type.starts_with("image/") {
        ContentBlock::Image { data, mime_type }
    } else if mime_type.starts_with("audio/") {
        ContentBlock::Audio { data, mime_type }
    } else if mime_type.starts_with("video/") {
        ContentBlock::Video { data, mime_type }
    } else {
        ContentBlock::File {
            data,
            mime_type,
            name: None,
        }
    }
}

fn map_finish_reason(reason: GeminiFinishReason) -> Option<FinishReason> {
    match reason {
        GeminiFinishReason::Stop => Some(FinishReason::Stop),
        GeminiFinishReason::MaxTokens => Some(FinishReason::Length),
        GeminiFinishReason::Safety
        | GeminiFinishReason::Recitation
        | GeminiFinishReason::Language
        | GeminiFinishReason::Blocklist
        | GeminiFinishReason::ProhibitedContent
        | GeminiFinishReason::Spii
        | GeminiFinishReason::ImageSafety => Some(FinishReason::ContentFilter),
        GeminiFinishReason::MalformedFunctionCall
        | GeminiFinishReason::UnexpectedToolCall
        | GeminiFinishReason::TooManyToolCalls => Some(FinishReason::ToolCalls),
        GeminiFinishReason::Other => None,
    }
}

fn build_request(request: &ChatRequest) -> GeminiRequest {
    let (system_instruction, contents) = convert_messages(&request.messages);

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(vec![GeminiTool {
            function_declarations: request
                .tools
                .iter()
                .map(|def| GeminiFunctionDeclaration {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    parameters_json_schema: def.parameters.clone(),
                })
                .collect(),
        }])
    };

    GeminiRequest {
        contents,
        system_instruction,
        generation_config: request.generation.as_ref().map(convert_generation),
        tools,
        tool_config: request.tool_choice.as_ref().map(convert_tool_choice),
        provider_config: request.provider_config.clone(),
    }
}

fn convert_generation(generation: &GenerationConfig) -> GeminiGenerationConfig {
    let (response_mime_type, response_json_schema) = match &generation.response_format {
        Some(ResponseFormat::JsonObject) => (Some("application/json".to_string()), None),
        Some(ResponseFormat::JsonSchema { schema, .. }) => {
            (Some("application/json".to_string()), Some(schema.clone()))
        }
        None => (None, None),
    };
    GeminiGenerationConfig {
        temperature: generation.temperature,
        top_p: generation.top_p,
        top_k: generation.top_k,
        max_output_tokens: generation.max_tokens,
        stop_sequences: generation.stop_sequences.clone(),
        frequency_penalty: generation.frequency_penalty,
        presence_penalty: generation.presence_penalty,
        response_mime_type,
        response_json_schema,
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> GeminiToolConfig {
    let function_calling_config = match choice {
        ToolChoice::Auto => FunctionCallingConfig {
            mode: "AUTO".to_string(),
            allowed_function_names: None,
        },
        ToolChoice::None => FunctionCallingConfig {
            mode: "NONE".to_string(),
            allowed_function_names: None,
        },
        ToolChoice::Required => FunctionCallingConfig {
            mode: "ANY".to_string(),
            allowed_function_names: None,
        },
        ToolChoice::Tool { name } => FunctionCallingConfig {
            mode: "ANY".to_string(),
            allowed_function_names: Some(vec![name.clone()]),
        },
    };
    GeminiToolConfig {
        function_calling_config,
    }
}

/// Split unified messages into the system instruction and the contents list.
fn convert_messages(messages: &[Message]) -> (Option<SystemInstruction>, Vec<GeminiContent>) {
    // functionResponse parts carry the function name, not a call id, so
    // recover names from the tool_use blocks earlier in the conversation.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for message in messages {
        for block in message.content.to_blocks() {
            if let ContentBlock::ToolUse { id, name, .. } = block {
                call_names.insert(id, name);
            }
        }
    }

    let mut system = String::new();
    let mut contents = Vec::new();

    for message in messages {
        match message.role {
            Role::System | Role::Developer => {
                let text = message.text();
                if !text.is_empty() {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&text);
                }
            }
            Role::Tool | Role::Function => {
                let parts: Vec<GeminiPart> = message
                    .content
                    .to_blocks()
                    .into_iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => {
                            let name = call_names
                                .get(&tool_use_id)
                                .cloned()
                                .unwrap_or(tool_use_id);
                            Some(GeminiPart::FunctionResponse {
                                function_response: FunctionResponse {
                                    name,
                                    response: wrap_response(content),
                                },
                            })
                        }
                        _ => None,
                    })
                    .collect();
                if !parts.is_empty() {
                    contents.push(GeminiContent {
                        role: GeminiRole::User,
                        parts,
                    });
                }
            }
            Role::User | Role::Assistant => {
                let role = if message.role == Role::Assistant {
                    GeminiRole::Model
                } else {
                    GeminiRole::User
                };
                let parts = convert_blocks(message.content.to_blocks());
                if !parts.is_empty() {
                    contents.push(GeminiContent { role, parts });
                }
            }
        }
    }

    let system_instruction = if system.is_empty() {
        None
    } else {
        Some(SystemInstruction {
            parts: vec![GeminiPart::Text {
                thought: None,
                text: system,
            }],
        })
    };
    (system_instruction, contents)
}

/// functionResponse bodies must be JSON objects.
fn wrap_response(content: Value) -> Value {
    match content {
        Value::Object(_) => content,
        other => json!({ "result": other }),
    }
}

fn convert_blocks(blocks: Vec<ContentBlock>) -> Vec<GeminiPart> {
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(GeminiPart::Text {
                thought: None,
                text,
            }),
            ContentBlock::Reasoning { text, .. } => parts.push(GeminiPart::Text {
                thought: Some(true),
                text,
            }),
            ContentBlock::Image { data, mime_type }
            | ContentBlock::Audio { data, mime_type }
            | ContentBlock::Video { data, mime_type } => parts.push(GeminiPart::InlineData {
                inline_data: InlineData { mime_type, data },
            }),
            ContentBlock::File {
                data, mime_type, ..
            } => parts.push(GeminiPart::InlineData {
                inline_data: InlineData { mime_type, data },
            }),
            ContentBlock::ToolUse { name, input, .. } => parts.push(GeminiPart::FunctionCall {
                thought_signature: None,
                function_call: FunctionCall { name, args: input },
            }),
            ContentBlock::ToolResult { .. } => {}
        }
    }
    parts
}

// --- Gemini API Request/Response Types ---

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    system_instruction: Option<SystemInstruction>,
    generation_config: Option<GeminiGenerationConfig>,
    tools: Option<Vec<GeminiTool>>,
    tool_config: Option<GeminiToolConfig>,
    #[serde(flatten)]
    provider_config: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
struct SystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFunctionDeclaration {
    name: String,
    description: Option<String>,
    parameters_json_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolConfig {
    function_calling_config: FunctionCallingConfig,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionCallingConfig {
    mode: String,
    allowed_function_names: Option<Vec<String>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    max_output_tokens: Option<u32>,
    stop_sequences: Option<Vec<String>>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
    response_mime_type: Option<String>,
    response_json_schema: Option<Value>,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum GeminiRole {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    role: GeminiRole,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
enum GeminiPart {
    Text {
        thought: Option<bool>,
        text: String,
    },
    FunctionCall {
        thought_signature: Option<String>,
        function_call: FunctionCall,
    },
    FunctionResponse {
        function_response: FunctionResponse,
    },
    InlineData {
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: NonEmpty<GeminiCandidate>,
    response_id: Option<String>,
    model_version: Option<String>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<GeminiFinishReason>,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum GeminiFinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Language,
    Blocklist,
    ProhibitedContent,
    Spii,
    ImageSafety,
    MalformedFunctionCall,
    UnexpectedToolCall,
    TooManyToolCalls,
    #[serde(other)]
    Other,
}

#[derive(Debug, Copy, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    thoughts_token_count: Option<u32>,
    cached_content_token_count: Option<u32>,
}

impl From<GeminiUsageMetadata> for Usage {
    fn from(meta: GeminiUsageMetadata) -> Self {
        // Thought tokens are billed as output but reported separately.
        let output = match (meta.candidates_token_count, meta.thoughts_token_count) {
            (None, None) => None,
            (candidates, thoughts) => {
                Some(candidates.unwrap_or_default() + thoughts.unwrap_or_default())
            }
        };
        Usage {
            input_tokens: meta.prompt_token_count,
            output_tokens: output,
            total_tokens: None,
            cache_creation_tokens: None,
            cache_read_tokens: meta.cached_content_token_count,
            reasoning_tokens: meta.thoughts_token_count,
        }
    }
}

/// One SSE frame of `streamGenerateContent`. Error objects can arrive
/// mid-stream in place of a regular chunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiChunk {
    response_id: Option<String>,
    model_version: Option<String>,
    candidates: Option<Vec<GeminiCandidate>>,
    usage_metadata: Option<GeminiUsageMetadata>,
    error: Option<GeminiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorBody {
    code: Option<i64>,
    message: Option<String>,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{StreamDelta, StreamEventType, ToolDefinition};

    fn client() -> Gemini {
        Gemini::create(ClientConfig::new("test-key").with_model("gemini-2.5-flash")).unwrap()
    }

    #[test]
    fn test_request_urls() {
        let client = client();
        assert_eq!(
            client.request_url("gemini-2.5-flash", false),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=test-key"
        );
        assert!(client
            .request_url("gemini-2.5-flash", true)
            .contains(":streamGenerateContent?alt=sse&key=test-key"));

        let custom = Gemini::create(
            ClientConfig::new("test-key").with_base_url("http://localhost:8080/v1beta/"),
        )
        .unwrap();
        assert_eq!(
            custom.request_url("gemini-2.5-flash", false),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash:generateContent?key=test-key"
        );
    }

    #[test]
    fn test_system_instruction_collected() {
        let (system, contents) = convert_messages(&[
            Message::system("be helpful"),
            Message::developer("be terse"),
            Message::user("hi"),
        ]);
        let system = system.unwrap();
        match &system.parts[0] {
            GeminiPart::Text { text, .. } => assert_eq!(text, "be helpful\nbe terse"),
            other => panic!("unexpected part: {:?}", other),
        }
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role, GeminiRole::User);
    }

    #[test]
    fn test_function_response_names_recovered() {
        let messages = vec![
            Message::user("weather in Oslo?"),
            Message::assistant_blocks(vec![ContentBlock::ToolUse {
                id: "call_abc".to_string(),
                name: "weather".to_string(),
                input: json!({"city": "Oslo"}),
            }]),
            Message::tool_results(vec![ContentBlock::ToolResult {
                tool_use_id: "call_abc".to_string(),
                is_error: false,
                content: json!("sunny"),
            }]),
        ];
        let (_, contents) = convert_messages(&messages);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role, GeminiRole::Model);
        assert_eq!(contents[2].role, GeminiRole::User);
        match &contents[2].parts[0] {
            GeminiPart::FunctionResponse { function_response } => {
                assert_eq!(function_response.name, "weather");
                assert_eq!(function_response.response, json!({"result": "sunny"}));
            }
            other => panic!("unexpected part: {:?}", other),
        }
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let request = ChatRequest::new(vec![
            Message::user("hi"),
            Message::assistant_blocks(vec![ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "lookup".to_string(),
                input: json!({"q": "rust"}),
            }]),
        ])
        .with_tools(vec![ToolDefinition::new(
            "lookup",
            json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        )])
        .with_tool_choice(ToolChoice::Tool {
            name: "lookup".to_string(),
        })
        .with_generation(GenerationConfig::new().with_max_tokens(256));

        let value = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(
            value["contents"][1]["parts"][0]["functionCall"],
            json!({"name": "lookup", "args": {"q": "rust"}})
        );
        assert_eq!(
            value["tools"][0]["functionDeclarations"][0]["parametersJsonSchema"]["type"],
            json!("object")
        );
        assert_eq!(
            value["toolConfig"]["functionCallingConfig"],
            json!({"mode": "ANY", "allowedFunctionNames": ["lookup"]})
        );
        assert_eq!(value["generationConfig"]["maxOutputTokens"], json!(256));
    }

    #[test]
    fn test_json_schema_format_sets_mime_type() {
        let generation = GenerationConfig {
            response_format: Some(ResponseFormat::JsonSchema {
                name: "answer".to_string(),
                schema: json!({"type": "object"}),
            }),
            ..GenerationConfig::default()
        };
        let converted = convert_generation(&generation);
        assert_eq!(converted.response_mime_type.as_deref(), Some("application/json"));
        assert_eq!(converted.response_json_schema, Some(json!({"type": "object"})));
    }

    #[test]
    fn test_parse_response_with_thoughts_and_call() {
        let raw = json!({
            "responseId": "resp_9",
            "modelVersion": "gemini-2.5-flash",
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"thought": true, "text": "user wants weather"},
                        {"text": "Checking."},
                        {"functionCall": {"name": "weather", "args": {"city": "Oslo"}}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 7,
                "candidatesTokenCount": 10,
                "thoughtsTokenCount": 5,
                "cachedContentTokenCount": 2
            }
        });
        let response = client().parse_response(raw).unwrap();
        assert_eq!(response.id, "resp_9");
        assert_eq!(response.model.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(response.text(), "Checking.");
        // STOP plus a pending call means the turn actually ended on tools.
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));

        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "weather");
        assert!(calls[0].call_id.starts_with("call_"));

        let usage = response.usage.unwrap();
        assert_eq!(usage.input_tokens, Some(7));
        assert_eq!(usage.output_tokens, Some(15));
        assert_eq!(usage.reasoning_tokens, Some(5));
        assert_eq!(usage.cache_read_tokens, Some(2));
        assert_eq!(usage.total_tokens, Some(22));
    }

    #[test]
    fn test_parse_response_unknown_finish_reason() {
        let raw = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "hi"}]},
                "finishReason": "SOME_FUTURE_REASON"
            }]
        });
        let response = client().parse_response(raw).unwrap();
        assert_eq!(response.finish_reason, None);
        assert!(response.id.starts_with("resp_"));
    }

    #[test]
    fn test_translate_chunks_assembles_response() {
        let mut aggregator = StreamAggregator::new(ProviderId::Gemini);
        let mut indexer = BlockIndexer::new();
        let mut tool_count = 0u32;

        let chunks = vec![
            json!({
                "responseId": "resp_3",
                "modelVersion": "gemini-2.5-flash",
                "candidates": [{"content": {"role": "model", "parts": [{"thought": true, "text": "hmm"}]}}],
                "usageMetadata": {"promptTokenCount": 4}
            }),
            json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Check"}]}}]
            }),
            json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "ing."}]}}]
            }),
            json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"functionCall": {"name": "weather", "args": {"city": "Oslo"}}}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 11, "thoughtsTokenCount": 3}
            }),
        ];

        let mut events = Vec::new();
        for chunk in chunks {
            let chunk: GeminiChunk = serde_json::from_value(chunk).unwrap();
            assert!(chunk.error.is_none());
            events.extend(translate_chunk(
                &mut aggregator,
                &mut indexer,
                &mut tool_count,
                chunk,
            ));
        }

        assert_eq!(events[0].event_type, StreamEventType::Start);
        let text: String = events
            .iter()
            .filter_map(|event| match &event.delta {
                Some(StreamDelta::Text { text }) => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Checking.");

        let response = aggregator.finish();
        assert_eq!(response.id, "resp_3");
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));

        let blocks = response.message.content.to_blocks();
        assert_eq!(
            blocks[0],
            ContentBlock::Reasoning {
                text: "hmm".to_string(),
                signature: None
            }
        );
        let calls = response.tool_calls();
        assert_eq!(calls[0].arguments, json!({"city": "Oslo"}));
        assert!(calls[0].call_id.starts_with("call_"));

        let usage = response.usage.unwrap();
        assert_eq!(usage.output_tokens, Some(14));
        assert_eq!(usage.total_tokens, Some(18));
    }

    #[test]
    fn test_stream_error_chunk() {
        let chunk: GeminiChunk = serde_json::from_value(json!({
            "error": {"code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED"}
        }))
        .unwrap();
        let error = stream_error(chunk.error.unwrap());
        assert_eq!(error.code, "RESOURCE_EXHAUSTED");
        assert_eq!(error.kind, ErrorKind::RateLimit);
        assert_eq!(error.message, "quota exceeded");
    }

    #[test]
    fn test_handle_error_response_uses_status_string() {
        let body = r#"{"error": {"code": 400, "message": "Invalid JSON payload received.", "status": "INVALID_ARGUMENT"}}"#;
        let error = handle_error_response(reqwest::StatusCode::BAD_REQUEST, body);
        match error {
            Error::Api(api) => {
                assert_eq!(api.code, "INVALID_ARGUMENT");
                assert_eq!(api.kind, ErrorKind::InvalidRequest);
                assert_eq!(api.status, Some(400));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let error = handle_error_response(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        match error {
            Error::Api(api) => {
                assert_eq!(api.code, "gemini_error");
                assert_eq!(api.kind, ErrorKind::ServerError);
                assert_eq!(api.message, "upstream down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_media_block_classification() {
        let image = media_block(InlineData {
            mime_type: "image/png".to_string(),
            data: "aGk=".to_string(),
        });
        assert!(matches!(image, ContentBlock::Image { .. }));

        let pdf = media_block(InlineData {
            mime_type: "application/pdf".to_string(),
            data: "aGk=".to_string(),
        });
        assert!(matches!(pdf, ContentBlock::File { name: None, .. }));
    }
}
