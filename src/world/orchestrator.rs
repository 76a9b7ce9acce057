//! The orchestrator (C9): runs one agent's LLM turn through
//! `PREPARE -> CALL_LLM -> (TEXT | TOOL_CALLS)`, including tool dispatch, approval/HITL
//! sentinel injection, and auto-mention.
//!
//! `Orchestrator<P: LlmProvider>` is generic over the provider trait rather than any
//! concrete vendor client, mirroring the grounding repo's pattern of coding agent logic
//! against a client trait object (`ClientWrapper`) instead of a concrete HTTP type.

use crate::world::bus::{
    SseEventType, ToolEventType, ToolExecutionInfo, WorldChannelEvent, WorldMessageEvent,
    WorldSSEEvent, WorldSystemEvent, WorldToolEvent,
};
use crate::world::config::{parse_dotenv_like, substitute_template};
use crate::world::error::OrchestratorError;
use crate::world::llm::{LlmCompletion, LlmProvider, LlmRequest, LlmStreamEvent};
use crate::world::llm_queue::CancellationToken;
use crate::world::protocol::{ApprovalDecision, HitlDecision, CLIENT_HUMAN_INTERVENTION, CLIENT_REQUEST_APPROVAL};
use crate::world::routing::{extract_paragraph_beginning_mentions, inject_leading_mention};
use crate::world::tool::{ToolExecutionContext, ToolRegistry, HUMAN_INTERVENTION_TOOL_NAME};
use crate::world::types::{ChatMessage, Role, ToolCall, ToolCallStatus, World, HUMAN_SENDER};
use crate::world::approval_cache::ApprovalCache;
use crate::world::storage::Storage;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub struct Orchestrator<P: LlmProvider> {
    pub world: Arc<World>,
    pub storage: Arc<dyn Storage>,
    pub tools: Arc<ToolRegistry>,
    pub approvals: Arc<ApprovalCache>,
    pub provider: Arc<P>,
}

impl<P: LlmProvider> Orchestrator<P> {
    pub fn new(
        world: Arc<World>,
        storage: Arc<dyn Storage>,
        tools: Arc<ToolRegistry>,
        approvals: Arc<ApprovalCache>,
        provider: Arc<P>,
    ) -> Self {
        Self {
            world,
            storage,
            tools,
            approvals,
            provider,
        }
    }

    /// Entry point for a fresh dispatch: the subscriber has already appended the
    /// triggering row to `agent.memory` before submitting this work unit.
    pub async fn run_turn(
        &self,
        agent_id: &str,
        trigger: WorldMessageEvent,
        token: CancellationToken,
    ) -> Result<(), OrchestratorError> {
        self.continue_llm_loop(agent_id, trigger, token).await
    }

    /// Resume an agent after a human approval/denial for a `client.requestApproval`
    /// sentinel.
    pub async fn resume_approval(
        &self,
        agent_id: &str,
        sentinel_tool_call_id: &str,
        decision: ApprovalDecision,
        trigger: WorldMessageEvent,
        token: CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let agent_handle = self
            .world
            .get_agent(agent_id)
            .await
            .ok_or_else(|| OrchestratorError::SecurityRejection(format!("unknown agent {agent_id}")))?;

        let (original_id, original_name, original_args) = {
            let agent = agent_handle.lock().await;
            let owning_idx = agent.find_owning_assistant_row(sentinel_tool_call_id).ok_or_else(|| {
                OrchestratorError::SecurityRejection(format!(
                    "tool_call_id {sentinel_tool_call_id} not owned by agent {agent_id}"
                ))
            })?;
            let sentinel = agent.memory[owning_idx]
                .tool_calls
                .iter()
                .find(|tc| tc.id == sentinel_tool_call_id)
                .cloned()
                .expect("owning row contains the sentinel call by construction");
            let original = sentinel
                .parsed_arguments()
                .get("originalToolCall")
                .cloned()
                .ok_or_else(|| OrchestratorError::SecurityRejection("sentinel missing originalToolCall".to_string()))?;
            let id = original["id"].as_str().unwrap_or_default().to_string();
            let name = original["name"].as_str().unwrap_or_default().to_string();
            let args = original["args"].clone();
            (id, name, args)
        };

        let content = if decision.decision == "approve" {
            if decision.scope == "session" {
                self.approvals.set(&trigger.chat_id, &decision.tool_name, true).await;
            }
            let ctx = ToolExecutionContext {
                world_id: self.world.id.clone(),
                chat_id: trigger.chat_id.clone(),
                execution_id: Uuid::new_v4().to_string(),
            };
            match self.tools.execute_tool(&original_name, original_args, &ctx).await {
                Ok(out) => out,
                Err(e) => format!("tool error: {e}"),
            }
        } else {
            "denied by human".to_string()
        };

        self.append_resumed_tool_row(&agent_handle, &original_id, content, &trigger)
            .await;
        self.continue_llm_loop(agent_id, trigger, token).await
    }

    /// Resume an agent after a human responds to a `client.humanIntervention`
    /// sentinel. Nothing is executed; the human's chosen option becomes the tool
    /// result verbatim. The approval cache is never touched (HITL is always re-asked).
    pub async fn resume_hitl(
        &self,
        agent_id: &str,
        sentinel_tool_call_id: &str,
        decision: HitlDecision,
        trigger: WorldMessageEvent,
        token: CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let agent_handle = self
            .world
            .get_agent(agent_id)
            .await
            .ok_or_else(|| OrchestratorError::SecurityRejection(format!("unknown agent {agent_id}")))?;

        let original_id = {
            let agent = agent_handle.lock().await;
            let owning_idx = agent.find_owning_assistant_row(sentinel_tool_call_id).ok_or_else(|| {
                OrchestratorError::SecurityRejection(format!(
                    "tool_call_id {sentinel_tool_call_id} not owned by agent {agent_id}"
                ))
            })?;
            let sentinel = agent.memory[owning_idx]
                .tool_calls
                .iter()
                .find(|tc| tc.id == sentinel_tool_call_id)
                .cloned()
                .expect("owning row contains the sentinel call by construction");
            sentinel
                .parsed_arguments()
                .get("originalToolCall")
                .and_then(|o| o.get("id"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        self.append_resumed_tool_row(&agent_handle, &original_id, decision.choice, &trigger)
            .await;
        self.continue_llm_loop(agent_id, trigger, token).await
    }

    /// Generic tool-result arrival (not an approval/HITL sentinel): used when an
    /// external transport executes a tool itself and reports the result back through
    /// the envelope protocol.
    pub async fn resume_generic_tool_result(
        &self,
        agent_id: &str,
        tool_call_id: &str,
        content: String,
        trigger: WorldMessageEvent,
        token: CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let agent_handle = self
            .world
            .get_agent(agent_id)
            .await
            .ok_or_else(|| OrchestratorError::SecurityRejection(format!("unknown agent {agent_id}")))?;

        {
            let agent = agent_handle.lock().await;
            if agent.find_owning_assistant_row(tool_call_id).is_none() {
                return Err(OrchestratorError::SecurityRejection(format!(
                    "tool_call_id {tool_call_id} not owned by agent {agent_id}"
                )));
            }
        }
        self.append_resumed_tool_row(&agent_handle, tool_call_id, content, &trigger)
            .await;
        self.continue_llm_loop(agent_id, trigger, token).await
    }

    async fn append_resumed_tool_row(
        &self,
        agent_handle: &Arc<tokio::sync::Mutex<crate::world::types::Agent>>,
        original_tool_call_id: &str,
        content: String,
        trigger: &WorldMessageEvent,
    ) {
        let mut agent = agent_handle.lock().await;
        let owning_idx = agent.find_owning_assistant_row(original_tool_call_id);
        agent.memory.push(
            ChatMessage::tool(content.clone(), original_tool_call_id.to_string())
                .with_chat_id(trigger.chat_id.clone()),
        );
        if let Some(idx) = owning_idx {
            agent.memory[idx].tool_call_status.insert(
                original_tool_call_id.to_string(),
                ToolCallStatus {
                    complete: true,
                    result: Some(serde_json::Value::String(content)),
                },
            );
        }
    }

    /// `PREPARE -> CALL_LLM -> (TEXT | TOOL_CALLS)`, looping back to `CALL_LLM` after
    /// each batch of executed (non-gated) tool calls.
    async fn continue_llm_loop(
        &self,
        agent_id: &str,
        trigger: WorldMessageEvent,
        token: CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let agent_handle = self
            .world
            .get_agent(agent_id)
            .await
            .ok_or_else(|| OrchestratorError::SecurityRejection(format!("unknown agent {agent_id}")))?;

        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            // PREPARE
            let (request, agent_name) = {
                let mut agent = agent_handle.lock().await;
                let vars = parse_dotenv_like(&self.world.variables);
                let system_prompt = substitute_template(&agent.system_prompt, &vars);

                let mut messages = vec![ChatMessage::system(system_prompt)];
                for m in &agent.memory {
                    if m.role == Role::Assistant && m.is_client_sentinel_only() {
                        continue;
                    }
                    if m.role == Role::Tool && m.is_sentinel_tool_result() {
                        continue;
                    }
                    let mut filtered = m.clone();
                    if filtered.role == Role::Assistant {
                        filtered.tool_calls.retain(|tc| !tc.is_client_sentinel());
                    }
                    messages.push(filtered);
                }

                let request = LlmRequest {
                    model: agent.model.clone(),
                    temperature: agent.temperature,
                    max_tokens: agent.max_tokens,
                    messages,
                    tools: self.tools.list_schemas(),
                };
                agent.llm_call_count += 1;
                agent.last_llm_call = Some(Utc::now());
                (request, agent.id.clone())
            };

            // CALL_LLM
            let message_id = Uuid::new_v4().to_string();
            self.world
                .bus
                .emit_sse(WorldSSEEvent {
                    agent_name: agent_name.clone(),
                    event_type: SseEventType::Start,
                    content: None,
                    error: None,
                    message_id: message_id.clone(),
                    chat_id: trigger.chat_id.clone(),
                    usage: None,
                })
                .await;

            let mut stream = match self.provider.stream(request).await {
                Ok(s) => s,
                Err(e) => {
                    self.world
                        .bus
                        .emit_sse(WorldSSEEvent {
                            agent_name: agent_name.clone(),
                            event_type: SseEventType::Error,
                            content: None,
                            error: Some(e.to_string()),
                            message_id: message_id.clone(),
                            chat_id: trigger.chat_id.clone(),
                            usage: None,
                        })
                        .await;
                    self.world
                        .bus
                        .emit_system(WorldSystemEvent {
                            content: format!("LLM call failed for {agent_name}: {e}"),
                            message_id: Uuid::new_v4().to_string(),
                            timestamp: Utc::now(),
                            chat_id: Some(trigger.chat_id.clone()),
                        })
                        .await;
                    return Err(e.into());
                }
            };

            let mut text = String::new();
            let mut completion = None;
            loop {
                if token.is_cancelled() {
                    self.flush_partial_assistant_row(&agent_handle, &text, &message_id, &trigger)
                        .await;
                    self.world
                        .bus
                        .emit_sse(WorldSSEEvent {
                            agent_name: agent_name.clone(),
                            event_type: SseEventType::End,
                            content: Some("aborted".to_string()),
                            error: None,
                            message_id: message_id.clone(),
                            chat_id: trigger.chat_id.clone(),
                            usage: None,
                        })
                        .await;
                    return Ok(());
                }
                match stream.next_event() {
                    Some(LlmStreamEvent::TextDelta(delta)) => {
                        text.push_str(&delta);
                        self.world
                            .bus
                            .emit_sse(WorldSSEEvent {
                                agent_name: agent_name.clone(),
                                event_type: SseEventType::Chunk,
                                content: Some(delta),
                                error: None,
                                message_id: message_id.clone(),
                                chat_id: trigger.chat_id.clone(),
                                usage: None,
                            })
                            .await;
                    }
                    Some(LlmStreamEvent::ToolCallDelta(_)) => {}
                    Some(LlmStreamEvent::Done(c)) => {
                        completion = Some(c);
                        break;
                    }
                    None => break,
                }
            }
            let completion = completion.unwrap_or_else(|| LlmCompletion::text(text.clone()));

            self.world
                .bus
                .emit_sse(WorldSSEEvent {
                    agent_name: agent_name.clone(),
                    event_type: SseEventType::End,
                    content: None,
                    error: None,
                    message_id: message_id.clone(),
                    chat_id: trigger.chat_id.clone(),
                    usage: None,
                })
                .await;

            if completion.has_tool_calls() {
                match self
                    .handle_tool_calls(&agent_handle, &agent_name, &completion.tool_calls, &message_id, &trigger)
                    .await?
                {
                    ToolCallsOutcome::Ended => return Ok(()),
                    ToolCallsOutcome::Resume => continue,
                }
            } else {
                let final_text = completion.text.unwrap_or(text);
                self.publish_text(&agent_handle, &agent_name, final_text, &message_id, &trigger)
                    .await;
                return Ok(());
            }
        }
    }

    async fn flush_partial_assistant_row(
        &self,
        agent_handle: &Arc<tokio::sync::Mutex<crate::world::types::Agent>>,
        partial_text: &str,
        message_id: &str,
        trigger: &WorldMessageEvent,
    ) {
        let mut agent = agent_handle.lock().await;
        let sender = agent.id.clone();
        agent.memory.push(
            ChatMessage::assistant(partial_text, sender)
                .with_message_id(message_id.to_string())
                .with_reply_to(trigger.message_id.clone())
                .with_chat_id(trigger.chat_id.clone()),
        );
    }

    async fn publish_text(
        &self,
        agent_handle: &Arc<tokio::sync::Mutex<crate::world::types::Agent>>,
        agent_name: &str,
        text: String,
        message_id: &str,
        trigger: &WorldMessageEvent,
    ) {
        {
            let mut agent = agent_handle.lock().await;
            agent.memory.push(
                ChatMessage::assistant(text.clone(), agent_name.to_string())
                    .with_message_id(message_id.to_string())
                    .with_reply_to(trigger.message_id.clone())
                    .with_chat_id(trigger.chat_id.clone()),
            );
        }

        let published_text = if trigger.sender.eq_ignore_ascii_case(HUMAN_SENDER) {
            text
        } else if extract_paragraph_beginning_mentions(&text)
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&trigger.sender))
        {
            text
        } else {
            inject_leading_mention(&text, &trigger.sender)
        };

        self.world
            .bus
            .emit_message(WorldMessageEvent {
                content: published_text,
                sender: agent_name.to_string(),
                message_id: message_id.to_string(),
                timestamp: Utc::now(),
                chat_id: trigger.chat_id.clone(),
                reply_to_message_id: Some(trigger.message_id.clone()),
            })
            .await;
    }

    async fn handle_tool_calls(
        &self,
        agent_handle: &Arc<tokio::sync::Mutex<crate::world::types::Agent>>,
        agent_name: &str,
        tool_calls: &[ToolCall],
        message_id: &str,
        trigger: &WorldMessageEvent,
    ) -> Result<ToolCallsOutcome, OrchestratorError> {
        for tc in tool_calls {
            if tc.name == HUMAN_INTERVENTION_TOOL_NAME {
                let sentinel = build_hitl_sentinel(tc);
                self.append_sentinel_row(agent_handle, agent_name, sentinel, message_id, trigger)
                    .await;
                return Ok(ToolCallsOutcome::Ended);
            }

            let tool = self.tools.get(&tc.name);
            let requires_approval = tool.as_ref().map(|t| t.requires_approval()).unwrap_or(false);
            let already_approved = self.approvals.is_approved(&trigger.chat_id, &tc.name).await;

            if requires_approval && !already_approved {
                let sentinel = build_approval_sentinel(tc);
                self.append_sentinel_row(agent_handle, agent_name, sentinel, message_id, trigger)
                    .await;
                return Ok(ToolCallsOutcome::Ended);
            }

            // EXECUTE
            {
                let mut agent = agent_handle.lock().await;
                agent.memory.push(
                    ChatMessage::assistant("", agent_name.to_string())
                        .with_message_id(message_id.to_string())
                        .with_reply_to(trigger.message_id.clone())
                        .with_chat_id(trigger.chat_id.clone())
                        .with_tool_calls(vec![tc.clone()]),
                );
            }

            let execution_id = Uuid::new_v4().to_string();
            self.world
                .bus
                .emit_world(WorldChannelEvent::Tool(WorldToolEvent {
                    agent_name: agent_name.to_string(),
                    event_type: ToolEventType::ToolStart,
                    message_id: message_id.to_string(),
                    chat_id: trigger.chat_id.clone(),
                    tool_execution: ToolExecutionInfo {
                        execution_id: execution_id.clone(),
                        tool_name: tc.name.clone(),
                        args: Some(tc.parsed_arguments()),
                        result: None,
                        stream: None,
                    },
                }))
                .await;

            let ctx = ToolExecutionContext {
                world_id: self.world.id.clone(),
                chat_id: trigger.chat_id.clone(),
                execution_id: execution_id.clone(),
            };
            let outcome = self.tools.execute_tool(&tc.name, tc.parsed_arguments(), &ctx).await;

            let (event_type, result_text) = match &outcome {
                Ok(out) => (ToolEventType::ToolResult, out.clone()),
                Err(e) => (ToolEventType::ToolError, e.to_string()),
            };
            self.world
                .bus
                .emit_world(WorldChannelEvent::Tool(WorldToolEvent {
                    agent_name: agent_name.to_string(),
                    event_type,
                    message_id: message_id.to_string(),
                    chat_id: trigger.chat_id.clone(),
                    tool_execution: ToolExecutionInfo {
                        execution_id,
                        tool_name: tc.name.clone(),
                        args: Some(tc.parsed_arguments()),
                        result: Some(serde_json::Value::String(result_text.clone())),
                        stream: None,
                    },
                }))
                .await;

            let mut agent = agent_handle.lock().await;
            agent
                .memory
                .push(ChatMessage::tool(result_text.clone(), tc.id.clone()).with_chat_id(trigger.chat_id.clone()));
            if let Some(row) = agent
                .memory
                .iter_mut()
                .rev()
                .find(|m| m.role == Role::Assistant && m.tool_calls.iter().any(|c| c.id == tc.id))
            {
                row.tool_call_status.insert(
                    tc.id.clone(),
                    ToolCallStatus {
                        complete: true,
                        result: Some(serde_json::Value::String(result_text)),
                    },
                );
            }
        }

        Ok(ToolCallsOutcome::Resume)
    }

    async fn append_sentinel_row(
        &self,
        agent_handle: &Arc<tokio::sync::Mutex<crate::world::types::Agent>>,
        agent_name: &str,
        sentinel: ToolCall,
        message_id: &str,
        trigger: &WorldMessageEvent,
    ) {
        let row = ChatMessage::assistant("", agent_name.to_string())
            .with_message_id(message_id.to_string())
            .with_reply_to(trigger.message_id.clone())
            .with_chat_id(trigger.chat_id.clone())
            .with_tool_calls(vec![sentinel]);

        {
            let mut agent = agent_handle.lock().await;
            agent.memory.push(row.clone());
        }

        self.world
            .bus
            .emit_message(WorldMessageEvent {
                content: String::new(),
                sender: agent_name.to_string(),
                message_id: message_id.to_string(),
                timestamp: Utc::now(),
                chat_id: trigger.chat_id.clone(),
                reply_to_message_id: Some(trigger.message_id.clone()),
            })
            .await;
    }
}

enum ToolCallsOutcome {
    Ended,
    Resume,
}

fn build_approval_sentinel(original: &ToolCall) -> ToolCall {
    let id = format!("approval_{}", Uuid::new_v4());
    let args = serde_json::json!({
        "originalToolCall": {"id": original.id, "name": original.name, "args": original.parsed_arguments()},
        "message": format!("Approve tool call to `{}`?", original.name),
        "options": ["deny", "approve_once", "approve_session"],
    });
    ToolCall::new(id, CLIENT_REQUEST_APPROVAL, args)
}

fn build_hitl_sentinel(original: &ToolCall) -> ToolCall {
    let original_args = original.parsed_arguments();
    let prompt = original_args.get("prompt").cloned().unwrap_or(serde_json::Value::Null);
    let options = original_args.get("options").cloned().unwrap_or(serde_json::Value::Null);
    let id = format!("hitl_{}", Uuid::new_v4());
    let args = serde_json::json!({
        "originalToolCall": {"id": original.id, "name": original.name, "args": original_args},
        "prompt": prompt,
        "options": options,
    });
    ToolCall::new(id, CLIENT_HUMAN_INTERVENTION, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::llm::ScriptedProvider;
    use crate::world::llm_queue::CancellationToken;
    use crate::world::storage::InMemoryStorage;
    use crate::world::tool::ShellTool;
    use crate::world::types::Agent;

    fn trigger(content: &str, sender: &str) -> WorldMessageEvent {
        WorldMessageEvent {
            content: content.to_string(),
            sender: sender.to_string(),
            message_id: "m1".to_string(),
            timestamp: Utc::now(),
            chat_id: "c1".to_string(),
            reply_to_message_id: None,
        }
    }

    async fn make_world_with_agent(agent_id: &str) -> Arc<World> {
        let world = Arc::new(World::new("w1", "World").with_current_chat("c1"));
        let mut agent = Agent::new(agent_id, "w1", "Agent One");
        agent.memory.push(ChatMessage::user("hello", HUMAN_SENDER));
        world.insert_agent(agent).await;
        world
    }

    #[tokio::test]
    async fn simple_turn_publishes_assistant_text_without_leading_mention() {
        let world = make_world_with_agent("a1").await;
        let storage = Arc::new(InMemoryStorage::new());
        let tools = Arc::new(ToolRegistry::new());
        let approvals = Arc::new(ApprovalCache::new());
        let provider = Arc::new(ScriptedProvider::new(vec![LlmCompletion::text("hi there")]));
        let orchestrator = Orchestrator::new(world.clone(), storage, tools, approvals, provider);

        orchestrator
            .run_turn("a1", trigger("hello", HUMAN_SENDER), CancellationToken::new())
            .await
            .unwrap();

        let agent = world.get_agent("a1").await.unwrap();
        let agent = agent.lock().await;
        let last = agent.memory.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "hi there");
    }

    #[tokio::test]
    async fn approval_required_tool_call_emits_sentinel_and_ends_turn() {
        let world = make_world_with_agent("a1").await;
        let storage = Arc::new(InMemoryStorage::new());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ShellTool::new()));
        let tools = Arc::new(registry);
        let approvals = Arc::new(ApprovalCache::new());
        let provider = Arc::new(ScriptedProvider::new(vec![LlmCompletion::tool_calls(vec![
            ToolCall::new("tc1", "shell_cmd", serde_json::json!({"cmd": "ls"})),
        ])]));
        let orchestrator = Orchestrator::new(world.clone(), storage, tools, approvals, provider);

        orchestrator
            .run_turn("a1", trigger("@a1 run ls", HUMAN_SENDER), CancellationToken::new())
            .await
            .unwrap();

        let agent = world.get_agent("a1").await.unwrap();
        let agent = agent.lock().await;
        let last = agent.memory.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.tool_calls.len(), 1);
        assert_eq!(last.tool_calls[0].name, CLIENT_REQUEST_APPROVAL);
        assert!(last.tool_calls[0].id.starts_with("approval_"));
    }

    #[tokio::test]
    async fn approved_session_scope_executes_and_caches() {
        let world = make_world_with_agent("a1").await;
        let storage = Arc::new(InMemoryStorage::new());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ShellTool::new()));
        let tools = Arc::new(registry);
        let approvals = Arc::new(ApprovalCache::new());
        let provider = Arc::new(ScriptedProvider::new(vec![LlmCompletion::text("done")]));
        let orchestrator = Orchestrator::new(world.clone(), storage, tools, approvals.clone(), provider);

        {
            let agent_handle = world.get_agent("a1").await.unwrap();
            let mut agent = agent_handle.lock().await;
            agent.memory.push(
                ChatMessage::assistant("", "a1")
                    .with_message_id("m2")
                    .with_chat_id("c1")
                    .with_tool_calls(vec![ToolCall::new(
                        "approval_x",
                        CLIENT_REQUEST_APPROVAL,
                        serde_json::json!({
                            "originalToolCall": {"id": "tc1", "name": "shell_cmd", "args": {"cmd": "echo hi"}},
                            "message": "approve?",
                            "options": ["deny", "approve_once", "approve_session"]
                        }),
                    )]),
            );
        }

        let decision = ApprovalDecision {
            decision: "approve".to_string(),
            scope: "session".to_string(),
            tool_name: "shell_cmd".to_string(),
        };
        orchestrator
            .resume_approval("a1", "approval_x", decision, trigger("reply", HUMAN_SENDER), CancellationToken::new())
            .await
            .unwrap();

        assert!(approvals.is_approved("c1", "shell_cmd").await);
        let agent = world.get_agent("a1").await.unwrap();
        let agent = agent.lock().await;
        let tool_row = agent.memory.iter().find(|m| m.tool_call_id.as_deref() == Some("tc1")).unwrap();
        assert_eq!(tool_row.content.trim(), "hi");
    }
}
