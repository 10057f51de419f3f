//! Assembly of streamed deltas into a complete response.
//!
//! Adapters translate vendor frames into calls on [`StreamAggregator`]; the
//! aggregator owns the cross-vendor rules: per-index block accumulation,
//! tool-call argument buffering, usage merging and finish-reason derivation.
//! The `Stop` event every stream ends with carries the result of
//! [`StreamAggregator::finish`], so a streamed turn and a non-streamed turn
//! produce the same [`ChatResponse`] shape.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{
    ChatResponse, ContentBlock, FinishReason, Message, StreamEvent, Usage,
};
use crate::providers::ProviderId;

/// One output block being assembled.
#[derive(Debug)]
enum BlockAccumulator {
    Text(String),
    Reasoning {
        text: String,
        signature: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
}

/// Accumulates stream deltas into the final response of a turn.
///
/// Blocks are keyed by output index and emitted in index order. Tool-call
/// arguments are buffered as raw strings and parsed once the stream ends;
/// fragments never need to be valid JSON on their own.
#[derive(Debug)]
pub struct StreamAggregator {
    provider: ProviderId,
    model: Option<String>,
    response_id: Option<String>,
    blocks: BTreeMap<usize, BlockAccumulator>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
    started: bool,
}

impl StreamAggregator {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            model: None,
            response_id: None,
            blocks: BTreeMap::new(),
            usage: None,
            finish_reason: None,
            started: false,
        }
    }

    /// Record response identity from a frame. Returns the `Start` event the
    /// first time it is called, `None` after that.
    pub fn begin(&mut self, id: Option<&str>, model: Option<&str>) -> Option<StreamEvent> {
        if self.response_id.is_none() {
            self.response_id = id.map(str::to_string);
        }
        if self.model.is_none() {
            self.model = model.map(str::to_string);
        }
        if self.started {
            None
        } else {
            self.started = true;
            Some(StreamEvent::start())
        }
    }

    /// Append answer text at `index` and build the matching delta event.
    pub fn push_text(&mut self, index: usize, text: &str) -> StreamEvent {
        let block = self
            .blocks
            .entry(index)
            .or_insert_with(|| BlockAccumulator::Text(String::new()));
        if let BlockAccumulator::Text(buffer) = block {
            buffer.push_str(text);
        }
        StreamEvent::text_delta(index, text)
    }

    /// Append reasoning text at `index`. Reasoning is carried on the final
    /// response only, never as a text delta.
    pub fn push_reasoning(&mut self, index: usize, text: &str) {
        let block = self.blocks.entry(index).or_insert_with(|| {
            BlockAccumulator::Reasoning {
                text: String::new(),
                signature: None,
            }
        });
        if let BlockAccumulator::Reasoning { text: buffer, .. } = block {
            buffer.push_str(text);
        }
    }

    pub fn set_reasoning_signature(&mut self, index: usize, signature: &str) {
        let block = self.blocks.entry(index).or_insert_with(|| {
            BlockAccumulator::Reasoning {
                text: String::new(),
                signature: None,
            }
        });
        if let BlockAccumulator::Reasoning { signature: slot, .. } = block {
            *slot = Some(signature.to_string());
        }
    }

    /// Open a tool-call block at `index`. The first non-empty id and name
    /// win; later frames for the same index only append arguments.
    pub fn start_tool_call(&mut self, index: usize, id: Option<&str>, name: Option<&str>) {
        let block = self.blocks.entry(index).or_insert_with(|| {
            BlockAccumulator::ToolCall {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            }
        });
        if let BlockAccumulator::ToolCall {
            id: id_slot,
            name: name_slot,
            ..
        } = block
        {
            if id_slot.is_empty() {
                if let Some(id) = id {
                    *id_slot = id.to_string();
                }
            }
            if name_slot.is_empty() {
                if let Some(name) = name {
                    *name_slot = name.to_string();
                }
            }
        }
    }

    /// Append a raw argument fragment to the tool call at `index`.
    pub fn push_tool_arguments(&mut self, index: usize, fragment: &str) {
        self.start_tool_call(index, None, None);
        if let Some(BlockAccumulator::ToolCall { arguments, .. }) = self.blocks.get_mut(&index) {
            arguments.push_str(fragment);
        }
    }

    /// Record the finish reason. `None` leaves any earlier value in place,
    /// so vendors that repeat the field across frames keep the last real one.
    pub fn set_finish(&mut self, finish: Option<FinishReason>) {
        if finish.is_some() {
            self.finish_reason = finish;
        }
    }

    /// Overlay usage counters from a frame onto what has been seen so far.
    pub fn merge_usage(&mut self, usage: Usage) {
        self.usage.get_or_insert_with(Usage::default).merge(usage);
    }

    /// Assemble the final response.
    ///
    /// Tool-call arguments that are empty or not valid JSON become `{}`. A
    /// turn that produced tool calls reports `ToolCalls` even when the vendor
    /// said `Stop` or said nothing, so callers can branch on one value.
    pub fn finish(self) -> ChatResponse {
        let mut content = Vec::new();
        for (_, block) in self.blocks {
            match block {
                BlockAccumulator::Text(text) => {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text });
                    }
                }
                BlockAccumulator::Reasoning { text, signature } => {
                    if !text.is_empty() {
                        content.push(ContentBlock::Reasoning { text, signature });
                    }
                }
                BlockAccumulator::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    let input = serde_json::from_str::<Value>(&arguments)
                        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
                    content.push(ContentBlock::ToolUse { id, name, input });
                }
            }
        }

        let has_tool_use = content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }));
        let finish_reason = derive_finish_reason(has_tool_use, self.finish_reason);

        ChatResponse {
            id: self
                .response_id
                .unwrap_or_else(|| format!("resp_{}", Uuid::new_v4().simple())),
            model: self.model,
            provider: self.provider,
            message: Message::assistant_blocks(content),
            usage: self.usage.map(Usage::totaled),
            finish_reason,
            created_at: Utc::now(),
            raw: None,
        }
    }
}

/// A turn that raised tool calls reports `ToolCalls` even when the vendor
/// said `Stop` or said nothing.
pub(crate) fn derive_finish_reason(
    has_tool_use: bool,
    finish: Option<FinishReason>,
) -> Option<FinishReason> {
    match finish {
        None | Some(FinishReason::Stop) if has_tool_use => Some(FinishReason::ToolCalls),
        other => other,
    }
}

/// Maps vendor-local item identities onto aggregator block indices.
///
/// OpenAI-style chunks index tool calls in their own space and give text and
/// reasoning no index at all; this assigns each logical item a stable global
/// index in first-seen order.
#[derive(Debug, Default)]
pub(crate) struct BlockIndexer {
    reasoning: Option<usize>,
    text: Option<usize>,
    tools: HashMap<u32, usize>,
    next: usize,
}

impl BlockIndexer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reasoning(&mut self) -> usize {
        let next = &mut self.next;
        *self.reasoning.get_or_insert_with(|| {
            let index = *next;
            *next += 1;
            index
        })
    }

    pub(crate) fn text(&mut self) -> usize {
        let next = &mut self.next;
        *self.text.get_or_insert_with(|| {
            let index = *next;
            *next += 1;
            index
        })
    }

    pub(crate) fn tool(&mut self, call_index: u32) -> usize {
        let next = &mut self.next;
        *self.tools.entry(call_index).or_insert_with(|| {
            let index = *next;
            *next += 1;
            index
        })
    }
}
