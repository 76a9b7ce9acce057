//! Crate-wide error taxonomy.
//!
//! Hand-written `Display` + `Error` implementations, matching the rest of this
//! codebase's style: no `thiserror`, no blanket `From` chains beyond what's needed to
//! compose these into `Box<dyn Error + Send + Sync>` at call boundaries.

use std::fmt;

/// Errors raised by the storage facade (`world::storage`).
#[derive(Debug, Clone)]
pub enum StorageError {
    /// The requested world/agent/chat/event does not exist.
    NotFound(String),
    /// A compare-and-set precondition failed (e.g. `updateChatTitle` with a stale
    /// expected title).
    Conflict(String),
    /// A stored JSON payload failed to serialize or deserialize.
    SerializationError(String),
    /// Backend-specific failure (I/O, connection, etc).
    Backend(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(what) => write!(f, "not found: {}", what),
            StorageError::Conflict(what) => write!(f, "conflict: {}", what),
            StorageError::SerializationError(msg) => write!(f, "serialization error: {}", msg),
            StorageError::Backend(msg) => write!(f, "storage backend error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Errors raised during tool execution (`world::tool`).
#[derive(Debug, Clone)]
pub enum ToolError {
    /// The tool name is not registered.
    NotFound(String),
    /// The tool ran but reported an application-level failure.
    ExecutionFailed(String),
    /// The JSON arguments failed validation.
    InvalidParameters(String),
    /// The tool exceeded its bounded execution time.
    TimedOut,
    /// The owning turn was canceled before the tool finished.
    Canceled,
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "invalid tool parameters: {}", msg),
            ToolError::TimedOut => write!(f, "tool execution timed out"),
            ToolError::Canceled => write!(f, "tool execution canceled"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Errors raised by an [`crate::world::llm::LlmProvider`].
#[derive(Debug, Clone)]
pub enum LlmError {
    /// The provider returned an error (rate limit, auth, transport, ...).
    Provider(String),
    /// The in-flight call was canceled via its cancellation token.
    Canceled,
    /// The provider's response could not be interpreted as text or tool calls.
    MalformedResponse(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Provider(msg) => write!(f, "LLM provider error: {}", msg),
            LlmError::Canceled => write!(f, "LLM call canceled"),
            LlmError::MalformedResponse(msg) => write!(f, "malformed LLM response: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors surfaced by the orchestrator (`world::orchestrator`), wrapping the above plus
/// the security-rejection case from §7.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    Storage(StorageError),
    Tool(ToolError),
    Llm(LlmError),
    /// Cross-agent tool-result, malformed envelope, or missing required envelope
    /// fields (§7 "Security rejection").
    SecurityRejection(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Storage(e) => write!(f, "{}", e),
            OrchestratorError::Tool(e) => write!(f, "{}", e),
            OrchestratorError::Llm(e) => write!(f, "{}", e),
            OrchestratorError::SecurityRejection(msg) => {
                write!(f, "security rejection: {}", msg)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<StorageError> for OrchestratorError {
    fn from(e: StorageError) -> Self {
        OrchestratorError::Storage(e)
    }
}

impl From<ToolError> for OrchestratorError {
    fn from(e: ToolError) -> Self {
        OrchestratorError::Tool(e)
    }
}

impl From<LlmError> for OrchestratorError {
    fn from(e: LlmError) -> Self {
        OrchestratorError::Llm(e)
    }
}
