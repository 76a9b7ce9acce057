//! The per-world event bus (C3): four logical channels, each with a type-named
//! sub-dispatch, fanned out synchronously to registered handlers.
//!
//! Modeled on `EventHandler` from the grounding repo's `event.rs` (an `async_trait`
//! with default no-op methods, shared behind `Arc<dyn EventHandler>`), generalized
//! from two fixed methods to the four channels this spec requires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A durable conversation event: a user, agent, or system message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldMessageEvent {
    pub content: String,
    pub sender: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub chat_id: String,
    pub reply_to_message_id: Option<String>,
}

/// The frame kind of an ephemeral streaming fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SseEventType {
    Start,
    Chunk,
    End,
    Error,
    ToolStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSSEEvent {
    pub agent_name: String,
    pub event_type: SseEventType,
    pub content: Option<String>,
    pub error: Option<String>,
    pub message_id: String,
    pub chat_id: String,
    pub usage: Option<serde_json::Value>,
}

/// The frame kind of a `world`-channel tool lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolEventType {
    ToolStart,
    ToolProgress,
    ToolResult,
    ToolError,
    ToolStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionInfo {
    pub execution_id: String,
    pub tool_name: String,
    pub args: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub stream: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldToolEvent {
    pub agent_name: String,
    pub event_type: ToolEventType,
    pub message_id: String,
    pub chat_id: String,
    pub tool_execution: ToolExecutionInfo,
}

/// The frame kind of a `world`-channel activity lifecycle event (§4.C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityEventType {
    ResponseStart,
    ResponseEnd,
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldActivityEvent {
    pub event_type: ActivityEventType,
    pub pending_operations: usize,
    pub activity_id: u64,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
    pub active_sources: Vec<String>,
}

/// The nested sub-type carried on the `world` channel: tool lifecycle or activity
/// lifecycle events, per `SPEC_FULL.md` §4.C3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorldChannelEvent {
    Tool(WorldToolEvent),
    Activity(WorldActivityEvent),
}

impl WorldChannelEvent {
    /// The type-named sub-channel this event also fans out on (e.g. `"idle"`,
    /// `"tool-result"`), used for narrow subscriptions.
    pub fn type_name(&self) -> &'static str {
        match self {
            WorldChannelEvent::Tool(t) => match t.event_type {
                ToolEventType::ToolStart => "tool-start",
                ToolEventType::ToolProgress => "tool-progress",
                ToolEventType::ToolResult => "tool-result",
                ToolEventType::ToolError => "tool-error",
                ToolEventType::ToolStream => "tool-stream",
            },
            WorldChannelEvent::Activity(a) => match a.event_type {
                ActivityEventType::ResponseStart => "response-start",
                ActivityEventType::ResponseEnd => "response-end",
                ActivityEventType::Idle => "idle",
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSystemEvent {
    pub content: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub chat_id: Option<String>,
}

/// Receives events from one or more of the bus's four channels.
///
/// Every method has a no-op default, so handlers override only what they need — the
/// event-persistence subscriber (C2) overrides all four; a narrow SSE-only consumer
/// overrides just `on_sse`.
///
/// Handlers are expected to report their own failures via internal logging rather than
/// panicking: the bus fans out synchronously and a panicking handler would poison the
/// whole emission for every other subscriber, so handler implementations (see
/// `world::persistence`-style subscribers) convert fallible work into a logged error
/// instead of propagating one.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_message(&self, _event: &WorldMessageEvent) {}
    async fn on_sse(&self, _event: &WorldSSEEvent) {}
    async fn on_world(&self, _event: &WorldChannelEvent) {}
    async fn on_system(&self, _event: &WorldSystemEvent) {}
}

/// The per-world multiplexer. Synchronous fan-out within a process; handler lists are
/// snapshotted before iteration so a handler may unsubscribe itself mid-emission
/// without deadlocking or invalidating the in-flight iterator.
pub struct EventBus {
    handlers: RwLock<Vec<(HandlerId, Arc<dyn EventHandler>)>>,
    next_id: std::sync::atomic::AtomicU64,
}

pub type HandlerId = u64;

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Attach a handler to all four channels. Returns an id usable with
    /// [`EventBus::unsubscribe`].
    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.handlers.write().await.push((id, handler));
        id
    }

    pub async fn unsubscribe(&self, id: HandlerId) {
        self.handlers.write().await.retain(|(hid, _)| *hid != id);
    }

    async fn snapshot(&self) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .await
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }

    pub async fn emit_message(&self, event: WorldMessageEvent) {
        for handler in self.snapshot().await {
            handler.on_message(&event).await;
        }
    }

    pub async fn emit_sse(&self, event: WorldSSEEvent) {
        for handler in self.snapshot().await {
            handler.on_sse(&event).await;
        }
    }

    pub async fn emit_world(&self, event: WorldChannelEvent) {
        for handler in self.snapshot().await {
            handler.on_world(&event).await;
        }
    }

    pub async fn emit_system(&self, event: WorldSystemEvent) {
        for handler in self.snapshot().await {
            handler.on_system(&event).await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
