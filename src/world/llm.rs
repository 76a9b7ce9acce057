//! The LLM provider boundary (C12): the abstract request/response contract the
//! orchestrator's CALL_LLM step drives.
//!
//! Modeled on the grounding repo's pattern of coding agent logic against a client trait
//! object rather than a concrete HTTP client; no vendor adapter lives in this crate
//! (out of scope per `SPEC_FULL.md` §1).

use crate::world::error::LlmError;
use crate::world::types::{ChatMessage, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A JSON-schema-shaped tool parameter, reused by both the LLM request and the tool
/// registry's own schema type so a provider can forward them unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ToolParameterType,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

/// A single non-streaming or streaming call's worth of input.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
}

/// The result of a completed (streaming or non-streaming) call. A provider may return
/// both a trailing text and tool calls; the orchestrator treats any non-empty
/// `tool_calls` as the TOOL_CALLS branch regardless of `text`.
#[derive(Debug, Clone, Default)]
pub struct LlmCompletion {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl LlmCompletion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One fragment of a streamed completion.
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    TextDelta(String),
    ToolCallDelta(ToolCall),
    Done(LlmCompletion),
}

/// A finite, non-restartable stream of [`LlmStreamEvent`]s.
pub struct LlmStream {
    events: std::vec::IntoIter<LlmStreamEvent>,
}

impl LlmStream {
    pub fn from_events(events: Vec<LlmStreamEvent>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }

    pub fn next_event(&mut self) -> Option<LlmStreamEvent> {
        self.events.next()
    }
}

/// The abstract boundary `Orchestrator<P: LlmProvider>` is generic over. Concrete
/// vendor adapters are out of scope; callers supply their own implementation or the
/// `ScriptedProvider` test double below.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmCompletion, LlmError>;

    /// Default implementation synthesizes a single-chunk stream around `complete` for
    /// providers with no native streaming support.
    async fn stream(&self, request: LlmRequest) -> Result<LlmStream, LlmError> {
        let completion = self.complete(request).await?;
        let mut events = Vec::new();
        if let Some(text) = &completion.text {
            events.push(LlmStreamEvent::TextDelta(text.clone()));
        }
        for call in &completion.tool_calls {
            events.push(LlmStreamEvent::ToolCallDelta(call.clone()));
        }
        events.push(LlmStreamEvent::Done(completion));
        Ok(LlmStream::from_events(events))
    }
}

/// A deterministic test double driven by a fixed, consumed-in-order sequence of
/// completions. Exported unconditionally (not `#[cfg(test)]`-gated) so that both the
/// crate's own unit tests and the `tests/` integration suite — a separate compilation
/// unit — can depend on it.
pub struct ScriptedProvider {
    responses: std::sync::Mutex<std::collections::VecDeque<LlmCompletion>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<LlmCompletion>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmCompletion, LlmError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Provider("ScriptedProvider exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            model: "scripted-v1".to_string(),
            temperature: 0.0,
            max_tokens: 16,
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn scripted_provider_returns_responses_in_order() {
        let provider = ScriptedProvider::new(vec![
            LlmCompletion::text("first"),
            LlmCompletion::text("second"),
        ]);
        let first = provider.complete(request()).await.unwrap();
        assert_eq!(first.text.as_deref(), Some("first"));
        let second = provider.complete(request()).await.unwrap();
        assert_eq!(second.text.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn scripted_provider_errors_when_exhausted() {
        let provider = ScriptedProvider::new(vec![]);
        assert!(provider.complete(request()).await.is_err());
    }

    #[tokio::test]
    async fn default_stream_synthesizes_single_chunk_around_complete() {
        let provider = ScriptedProvider::new(vec![LlmCompletion::text("hi")]);
        let mut stream = provider.stream(request()).await.unwrap();
        assert!(matches!(stream.next_event(), Some(LlmStreamEvent::TextDelta(_))));
        assert!(matches!(stream.next_event(), Some(LlmStreamEvent::Done(_))));
        assert!(stream.next_event().is_none());
    }
}
