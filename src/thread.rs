//! Serializable conversation state.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{Message, Role};

/// A conversation carried across agent calls.
///
/// The thread owns the full message history plus the provider continuation
/// id, and is serializable so conversations can be persisted and resumed.
/// Repeated identical system or developer preambles are dropped on ingest,
/// so callers can pass the same instruction message on every call without
/// stacking copies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thread {
    history: Vec<Message>,
    previous_response_id: Option<String>,
}

/// The messages and continuation id one request should carry.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub messages: Vec<Message>,
    pub previous_response_id: Option<String>,
}

fn is_duplicate_preamble(existing: &[Message], message: &Message) -> bool {
    matches!(message.role, Role::System | Role::Developer)
        && existing
            .iter()
            .any(|m| m.role == message.role && m.content == message.content)
}

impl Thread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn previous_response_id(&self) -> Option<&str> {
        self.previous_response_id.as_deref()
    }

    /// Record the continuation id of the latest response.
    pub fn set_previous_response_id(&mut self, id: impl Into<String>) -> Result<(), Error> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::Thread(
                "previous response id must not be blank".to_string(),
            ));
        }
        self.previous_response_id = Some(id);
        Ok(())
    }

    pub fn clear_previous_response_id(&mut self) {
        self.previous_response_id = None;
    }

    /// Append one message without deduplication. The agent uses this for
    /// assistant and tool-result messages, which are never preambles.
    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Append the caller's new messages, dropping system and developer
    /// messages that structurally duplicate one already present (same role,
    /// equal content; ids and timestamps are ignored).
    pub fn ingest(&mut self, new_messages: Vec<Message>) {
        for message in new_messages {
            if is_duplicate_preamble(&self.history, &message) {
                continue;
            }
            self.history.push(message);
        }
    }

    /// The context a request built from this thread plus `new_messages`
    /// would carry, applying the same deduplication as [`Thread::ingest`]
    /// without mutating the thread.
    pub fn build_request_context(&self, new_messages: &[Message]) -> RequestContext {
        let mut messages = self.history.clone();
        for message in new_messages {
            if is_duplicate_preamble(&messages, message) {
                continue;
            }
            messages.push(message.clone());
        }
        RequestContext {
            messages,
            previous_response_id: self.previous_response_id.clone(),
        }
    }
}
