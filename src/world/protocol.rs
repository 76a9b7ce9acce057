//! Approval/HITL enhanced-string envelope (C10): the JSON-encoded control-message
//! format that rides the ordinary `message` channel.

use crate::world::types::{ChatMessage, Role};
use serde::{Deserialize, Serialize};

pub const APPROVAL_SENTINEL_PREFIX: &str = "approval_";
pub const HITL_SENTINEL_PREFIX: &str = "hitl_";
pub const CLIENT_REQUEST_APPROVAL: &str = "client.requestApproval";
pub const CLIENT_HUMAN_INTERVENTION: &str = "client.humanIntervention";

/// The outer wire envelope: `{"__type": "tool_result", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultEnvelope {
    #[serde(rename = "__type")]
    pub type_tag: String,
    pub tool_call_id: String,
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub content: String,
}

impl ToolResultEnvelope {
    pub fn is_tool_result(&self) -> bool {
        self.type_tag == "tool_result"
    }
}

/// The inner approval decision payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub decision: String,
    pub scope: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
}

/// The inner HITL decision payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlDecision {
    pub decision: String,
    pub scope: String,
    pub choice: String,
    #[serde(rename = "toolName")]
    pub tool_name: String,
}

/// The result of parsing a raw message body: either a recognized control envelope
/// (carrying the resulting chat-message row plus an optional routing target) or a
/// fallback to plain text.
pub struct ParsedMessage {
    pub message: ChatMessage,
    pub target_agent_id: Option<String>,
}

/// Parse `raw` as a `tool_result` envelope; on any failure (not JSON, missing fields,
/// wrong `__type`) fall back to a plain chat-message row with `default_role`.
pub fn parse_message_content(raw: &str, default_role: Role) -> ParsedMessage {
    match serde_json::from_str::<ToolResultEnvelope>(raw) {
        Ok(envelope) if envelope.is_tool_result() => ParsedMessage {
            message: ChatMessage::tool(envelope.content.clone(), envelope.tool_call_id.clone()),
            target_agent_id: Some(envelope.agent_id),
        },
        _ => ParsedMessage {
            message: match default_role {
                Role::System => ChatMessage::system(raw),
                Role::User => ChatMessage::user(raw, crate::world::types::HUMAN_SENDER),
                Role::Assistant => ChatMessage::assistant(raw, crate::world::types::HUMAN_SENDER),
                Role::Tool => ChatMessage::tool(raw, ""),
            },
            target_agent_id: None,
        },
    }
}

/// Build the raw wire body for an approval or HITL reply, for use by test harnesses
/// and transports constructing envelopes to publish.
pub fn build_tool_result_envelope(
    tool_call_id: impl Into<String>,
    agent_id: impl Into<String>,
    inner_content: impl Into<String>,
) -> String {
    let envelope = ToolResultEnvelope {
        type_tag: "tool_result".to_string(),
        tool_call_id: tool_call_id.into(),
        agent_id: agent_id.into(),
        content: inner_content.into(),
    };
    serde_json::to_string(&envelope).expect("envelope is always serializable")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_tool_result_envelope() {
        let inner = serde_json::json!({"decision": "approve", "scope": "once", "toolName": "shell_cmd"}).to_string();
        let raw = build_tool_result_envelope("approval_1", "a1", inner.clone());

        let parsed = parse_message_content(&raw, Role::User);
        assert_eq!(parsed.target_agent_id.as_deref(), Some("a1"));
        assert_eq!(parsed.message.tool_call_id.as_deref(), Some("approval_1"));
        assert_eq!(parsed.message.content, inner);
    }

    #[test]
    fn falls_back_to_plain_text_when_not_an_envelope() {
        let parsed = parse_message_content("just chatting", Role::User);
        assert!(parsed.target_agent_id.is_none());
        assert_eq!(parsed.message.content, "just chatting");
        assert_eq!(parsed.message.role, Role::User);
    }

    #[test]
    fn falls_back_when_type_tag_is_wrong() {
        let raw = serde_json::json!({
            "__type": "something_else",
            "tool_call_id": "x",
            "agentId": "a1",
            "content": "y"
        })
        .to_string();
        let parsed = parse_message_content(&raw, Role::User);
        assert!(parsed.target_agent_id.is_none());
    }
}
