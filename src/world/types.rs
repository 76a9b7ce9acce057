//! Core data model: worlds, agents, chat messages, tool calls, chats, event records.
//!
//! See `SPEC_FULL.md` §3 for the authoritative entity/invariant list.

use crate::world::activity::ActivityTracker;
use crate::world::bus::EventBus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// The reserved sender literal that marks a message as human-authored.
///
/// [`crate::world::routing::should_agent_respond`] compares against this
/// case-insensitively; storage always keeps the canonical uppercase form.
pub const HUMAN_SENDER: &str = "HUMAN";

/// The sentinel title a newly created chat is given; see
/// [`crate::world::title`] for the auto-titling contract.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Role of a [`ChatMessage`] within an agent's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tool call requested by an assistant turn.
///
/// `id` is LLM-assigned for ordinary calls, or prefixed `approval_` / `hitl_` for the
/// client-side sentinels synthesized by the orchestrator (§4.C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, matching the wire shape described in §3.
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    pub fn parsed_arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments).unwrap_or(serde_json::Value::Null)
    }

    /// True for the orchestrator-synthesized sentinels that must never reach an LLM
    /// (§3 memory-filtering invariant: function names beginning with `client.`).
    pub fn is_client_sentinel(&self) -> bool {
        self.name.starts_with("client.")
    }
}

/// Per-tool-call completion bookkeeping stored on the assistant row that issued it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallStatus {
    pub complete: bool,
    pub result: Option<serde_json::Value>,
}

/// A single record in `agent.memory`.
///
/// Storage retains every row unchanged; only the orchestrator's LLM-input builder
/// (PREPARE step 2) filters sentinel rows out of what the model sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub sender: Option<String>,
    pub message_id: Option<String>,
    pub reply_to_message_id: Option<String>,
    pub chat_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Present only on assistant rows that requested tool calls.
    pub tool_calls: Vec<ToolCall>,
    /// Present only on tool rows, correlating back to the originating `ToolCall::id`.
    pub tool_call_id: Option<String>,
    /// Present only on assistant rows with `tool_calls`; keyed by `ToolCall::id`.
    pub tool_call_status: HashMap<String, ToolCallStatus>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>, sender: impl Into<String>) -> Self {
        let mut m = Self::new(Role::User, content);
        m.sender = Some(sender.into());
        m
    }

    pub fn assistant(content: impl Into<String>, sender: impl Into<String>) -> Self {
        let mut m = Self::new(Role::Assistant, content);
        m.sender = Some(sender.into());
        m
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut m = Self::new(Role::Tool, content);
        m.tool_call_id = Some(tool_call_id.into());
        m
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sender: None,
            message_id: None,
            reply_to_message_id: None,
            chat_id: None,
            created_at: Some(Utc::now()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_call_status: HashMap::new(),
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, id: impl Into<String>) -> Self {
        self.reply_to_message_id = Some(id.into());
        self
    }

    pub fn with_chat_id(mut self, id: impl Into<String>) -> Self {
        self.chat_id = Some(id.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// True if every `tool_call` on this assistant row is a `client.*` sentinel.
    pub fn is_client_sentinel_only(&self) -> bool {
        !self.tool_calls.is_empty() && self.tool_calls.iter().all(ToolCall::is_client_sentinel)
    }

    /// True for a tool row whose `tool_call_id` marks it as an approval/HITL sentinel
    /// result, per the memory-filtering invariant in §3.
    pub fn is_sentinel_tool_result(&self) -> bool {
        matches!(&self.tool_call_id, Some(id) if id.starts_with("approval_") || id.starts_with("hitl_"))
    }
}

/// An LLM-backed conversational participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub world_id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    #[serde(default = "default_true")]
    pub auto_reply: bool,
    pub memory: Vec<ChatMessage>,
    pub llm_call_count: u64,
    pub last_llm_call: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Agent {
    pub fn new(id: impl Into<String>, world_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            world_id: world_id.into(),
            name: name.into(),
            provider: "scripted".to_string(),
            model: "scripted-v1".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            system_prompt: String::new(),
            auto_reply: true,
            memory: Vec::new(),
            llm_call_count: 0,
            last_llm_call: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_auto_reply(mut self, auto_reply: bool) -> Self {
        self.auto_reply = auto_reply;
        self
    }

    /// Find the assistant row that issued `tool_call_id`, used by the subscriber's
    /// tool-result ownership check (§4.C8 Security) and by the orchestrator's approval
    /// resumption.
    pub fn find_owning_assistant_row(&self, tool_call_id: &str) -> Option<usize> {
        self.memory.iter().position(|m| {
            m.role == Role::Assistant && m.tool_calls.iter().any(|tc| tc.id == tool_call_id)
        })
    }

    /// Count of consecutive trailing assistant rows authored by this agent within the
    /// same reply thread (§4.C7 turn-limit), stopping at the first row from a
    /// different sender or a non-assistant role.
    pub fn consecutive_trailing_assistant_rows(&self) -> usize {
        let mut count = 0;
        for m in self.memory.iter().rev() {
            if m.role == Role::Assistant && m.sender.as_deref() == Some(self.id.as_str()) {
                count += 1;
            } else {
                break;
            }
        }
        count
    }
}

/// A conversation scope within a world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub world_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(id: impl Into<String>, world_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            world_id: world_id.into(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_CHAT_TITLE
    }
}

/// The logical channel an [`EventRecord`] was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventRecordType {
    Message,
    Sse,
    World,
    System,
}

/// A persisted, sequence-numbered record of a single bus emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub world_id: String,
    pub chat_id: Option<String>,
    pub seq: u64,
    pub record_type: EventRecordType,
    pub payload: serde_json::Value,
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Terminal and in-flight states of a built-in shell execution (§3 ShellExecution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellExecutionState {
    Queued,
    Starting,
    Running,
    Completed,
    Failed,
    Canceled,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellExecution {
    pub execution_id: String,
    pub world_id: String,
    pub chat_id: String,
    pub state: ShellExecutionState,
    pub exit_code: Option<i32>,
}

/// A container for agents, chats, an event bus, and scoped runtime state.
///
/// The bus and the agent registry are owned by the world (not process globals), per
/// the REDESIGN FLAGS in `SPEC_FULL.md` §9 ("Singleton shared registries"). Each agent
/// is individually mutex-guarded (rather than the whole map being locked for the
/// duration of a turn) so that distinct agents in the same chat can run their
/// orchestrator turns concurrently, per §5 ("multiple agents in the same chat may run
/// concurrently").
pub struct World {
    pub id: String,
    pub name: String,
    pub main_agent: Option<String>,
    pub variables: String,
    pub current_chat_id: Option<String>,
    pub turn_limit: usize,
    pub bus: Arc<EventBus>,
    pub agents: RwLock<HashMap<String, Arc<Mutex<Agent>>>>,
    pub activity: Arc<ActivityTracker>,
}

/// Default turn-limit per `SPEC_FULL.md` §4.C7: 3 consecutive same-agent assistant
/// rows per thread. Kept as a named constant so `World::new` and tests agree on it.
pub const DEFAULT_TURN_LIMIT: usize = 3;

impl World {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let bus = Arc::new(EventBus::new());
        Self {
            id: id.into(),
            name: name.into(),
            main_agent: None,
            variables: String::new(),
            current_chat_id: None,
            turn_limit: DEFAULT_TURN_LIMIT,
            activity: Arc::new(ActivityTracker::new(bus.clone())),
            bus,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_main_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.main_agent = Some(agent_id.into());
        self
    }

    pub fn with_current_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.current_chat_id = Some(chat_id.into());
        self
    }

    /// `isProcessing` per §3: true iff the activity tracker's in-flight counter > 0.
    pub fn is_processing(&self) -> bool {
        self.activity.is_processing()
    }

    pub async fn insert_agent(&self, agent: Agent) {
        self.agents
            .write()
            .await
            .insert(agent.id.clone(), Arc::new(Mutex::new(agent)));
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Arc<Mutex<Agent>>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn remove_agent(&self, agent_id: &str) {
        self.agents.write().await.remove(agent_id);
    }

    /// The transport boundary for inbound traffic: applies main-agent routing
    /// (§4.C7) before fanning the event out on the bus, so every downstream
    /// consumer — mention rules, memory, persistence — sees the same effective
    /// body. Human messages with no paragraph-beginning mention get a leading
    /// `@<mainAgent>, ` prefix when the world has one configured; the injection
    /// is idempotent, so a message that already mentions someone is left alone.
    pub async fn publish_message(&self, mut event: crate::world::bus::WorldMessageEvent) {
        if event.sender.eq_ignore_ascii_case(HUMAN_SENDER) {
            if let Some(main_agent) = &self.main_agent {
                event.content = crate::world::routing::inject_leading_mention(&event.content, main_agent);
            }
        }
        self.bus.emit_message(event).await;
    }
}
