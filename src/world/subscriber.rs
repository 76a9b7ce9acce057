//! Per-agent message subscriber (C8): attached to the `message` channel for each
//! loaded agent, deciding dispatch via the routing rules and feeding the LLM queue.

use crate::world::bus::{EventHandler, WorldMessageEvent, WorldSystemEvent};
use crate::world::llm::LlmProvider;
use crate::world::llm_queue::{with_completion_hook, LlmQueue};
use crate::world::orchestrator::Orchestrator;
use crate::world::protocol::{parse_message_content, ApprovalDecision, HitlDecision};
use crate::world::routing::should_agent_respond;
use crate::world::types::{ChatMessage, Role, World};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Attached once per `(world, agent)` pair. Holds everything needed to evaluate the
/// dispatch rules and, if matched, submit an orchestrator work unit.
pub struct MessageSubscriber<P: LlmProvider + 'static> {
    pub world: Arc<World>,
    pub agent_id: String,
    pub queue: Arc<LlmQueue>,
    pub orchestrator: Arc<Orchestrator<P>>,
}

impl<P: LlmProvider + 'static> MessageSubscriber<P> {
    pub fn new(
        world: Arc<World>,
        agent_id: impl Into<String>,
        queue: Arc<LlmQueue>,
        orchestrator: Arc<Orchestrator<P>>,
    ) -> Self {
        Self {
            world,
            agent_id: agent_id.into(),
            queue,
            orchestrator,
        }
    }

    async fn dispatch_fresh_turn(&self, event: WorldMessageEvent) {
        let world_id = self.world.id.clone();
        let chat_id = event.chat_id.clone();
        let agent_id = self.agent_id.clone();
        let orchestrator = self.orchestrator.clone();
        let queue = self.queue.clone();
        let key = (world_id.clone(), chat_id.clone());

        let guard = self.world.activity.begin(agent_id.clone()).await;
        let work = with_completion_hook(queue.clone(), key, move |token| {
            Box::pin(async move {
                let _ = orchestrator.run_turn(&agent_id, event, token).await;
                guard.end().await;
            })
        });
        self.queue.submit(world_id, chat_id, work).await;
    }

    async fn handle_tool_result(&self, tool_call_id: String, agent_id_from_envelope: String, content: String, trigger: WorldMessageEvent) {
        if agent_id_from_envelope != self.agent_id {
            return;
        }
        let Some(agent_handle) = self.world.get_agent(&self.agent_id).await else {
            return;
        };
        let owned = {
            let agent = agent_handle.lock().await;
            agent.find_owning_assistant_row(&tool_call_id).is_some()
        };
        if !owned {
            self.world
                .bus
                .emit_system(WorldSystemEvent {
                    content: format!(
                        "rejected tool result: tool_call_id {tool_call_id} is not owned by agent {}",
                        self.agent_id
                    ),
                    message_id: Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                    chat_id: Some(trigger.chat_id.clone()),
                })
                .await;
            return;
        }

        let world_id = self.world.id.clone();
        let chat_id = trigger.chat_id.clone();
        let agent_id = self.agent_id.clone();
        let orchestrator = self.orchestrator.clone();
        let queue = self.queue.clone();
        let key = (world_id.clone(), chat_id.clone());
        let guard = self.world.activity.begin(agent_id.clone()).await;

        let dispatch_kind = resolve_dispatch_kind(&tool_call_id, &content);
        let work = with_completion_hook(queue.clone(), key, move |token| {
            Box::pin(async move {
                let result = match dispatch_kind {
                    DispatchKind::Approval(decision) => {
                        orchestrator
                            .resume_approval(&agent_id, &tool_call_id, decision, trigger, token)
                            .await
                    }
                    DispatchKind::Hitl(decision) => {
                        orchestrator
                            .resume_hitl(&agent_id, &tool_call_id, decision, trigger, token)
                            .await
                    }
                    DispatchKind::Generic => {
                        orchestrator
                            .resume_generic_tool_result(&agent_id, &tool_call_id, content, trigger, token)
                            .await
                    }
                };
                let _ = result;
                guard.end().await;
            })
        });
        self.queue.submit(world_id, chat_id, work).await;
    }
}

enum DispatchKind {
    Approval(ApprovalDecision),
    Hitl(HitlDecision),
    Generic,
}

fn resolve_dispatch_kind(tool_call_id: &str, content: &str) -> DispatchKind {
    if tool_call_id.starts_with(crate::world::protocol::APPROVAL_SENTINEL_PREFIX) {
        if let Ok(decision) = serde_json::from_str::<ApprovalDecision>(content) {
            return DispatchKind::Approval(decision);
        }
    }
    if tool_call_id.starts_with(crate::world::protocol::HITL_SENTINEL_PREFIX) {
        if let Ok(decision) = serde_json::from_str::<HitlDecision>(content) {
            return DispatchKind::Hitl(decision);
        }
    }
    DispatchKind::Generic
}

#[async_trait]
impl<P: LlmProvider + 'static> EventHandler for MessageSubscriber<P> {
    async fn on_message(&self, event: &WorldMessageEvent) {
        if Some(event.chat_id.as_str()) != self.world.current_chat_id.as_deref() {
            return;
        }

        let parsed = parse_message_content(&event.content, Role::User);
        if parsed.message.role == Role::Tool {
            if let (Some(tool_call_id), Some(target_agent_id)) =
                (parsed.message.tool_call_id.clone(), parsed.target_agent_id.clone())
            {
                self.handle_tool_result(tool_call_id, target_agent_id, parsed.message.content, event.clone())
                    .await;
                return;
            }
        }

        let Some(agent_handle) = self.world.get_agent(&self.agent_id).await else {
            return;
        };

        let should_respond = {
            let agent = agent_handle.lock().await;
            should_agent_respond(&self.world, &agent, event)
        };

        if !should_respond {
            let mut agent = agent_handle.lock().await;
            let exceeded_turn_limit = !event.sender.eq_ignore_ascii_case(&self.agent_id)
                && agent.consecutive_trailing_assistant_rows() >= self.world.turn_limit;
            agent.memory.push(
                ChatMessage::user(event.content.clone(), event.sender.clone())
                    .with_message_id(event.message_id.clone())
                    .with_chat_id(event.chat_id.clone()),
            );
            drop(agent);
            if exceeded_turn_limit {
                self.world
                    .bus
                    .emit_system(WorldSystemEvent {
                        content: format!("{} has hit its turn limit for this thread", self.agent_id),
                        message_id: Uuid::new_v4().to_string(),
                        timestamp: Utc::now(),
                        chat_id: Some(event.chat_id.clone()),
                    })
                    .await;
            }
            return;
        }

        {
            let mut agent = agent_handle.lock().await;
            agent.memory.push(
                ChatMessage::user(event.content.clone(), event.sender.clone())
                    .with_message_id(event.message_id.clone())
                    .with_chat_id(event.chat_id.clone()),
            );
        }

        self.dispatch_fresh_turn(event.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::approval_cache::ApprovalCache;
    use crate::world::llm::{LlmCompletion, ScriptedProvider};
    use crate::world::storage::InMemoryStorage;
    use crate::world::tool::ToolRegistry;
    use crate::world::types::{Agent, HUMAN_SENDER};

    fn event(content: &str, sender: &str) -> WorldMessageEvent {
        WorldMessageEvent {
            content: content.to_string(),
            sender: sender.to_string(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            chat_id: "c1".to_string(),
            reply_to_message_id: None,
        }
    }

    async fn make_subscriber(
        agent_id: &str,
        auto_reply: bool,
    ) -> (Arc<World>, MessageSubscriber<ScriptedProvider>) {
        let world = Arc::new(World::new("w1", "World").with_current_chat("c1"));
        let agent = Agent::new(agent_id, "w1", "Agent").with_auto_reply(auto_reply);
        world.insert_agent(agent).await;

        let storage = Arc::new(InMemoryStorage::new());
        let tools = Arc::new(ToolRegistry::new());
        let approvals = Arc::new(ApprovalCache::new());
        let provider = Arc::new(ScriptedProvider::new(vec![LlmCompletion::text("ack")]));
        let orchestrator = Arc::new(Orchestrator::new(world.clone(), storage, tools, approvals, provider));
        let queue = Arc::new(LlmQueue::new());
        let subscriber = MessageSubscriber::new(world.clone(), agent_id, queue, orchestrator);
        (world, subscriber)
    }

    #[tokio::test]
    async fn non_matching_message_is_still_persisted_into_memory() {
        let (world, subscriber) = make_subscriber("a1", false).await;
        subscriber.on_message(&event("hello everyone", HUMAN_SENDER)).await;

        let agent = world.get_agent("a1").await.unwrap();
        let agent = agent.lock().await;
        assert!(agent.memory.iter().any(|m| m.content == "hello everyone"));
    }

    #[tokio::test]
    async fn cross_chat_messages_are_ignored_entirely() {
        let (world, subscriber) = make_subscriber("a1", true).await;
        let mut evt = event("hello", HUMAN_SENDER);
        evt.chat_id = "other-chat".to_string();
        subscriber.on_message(&evt).await;

        let agent = world.get_agent("a1").await.unwrap();
        let agent = agent.lock().await;
        assert!(agent.memory.is_empty());
    }

    #[tokio::test]
    async fn matching_message_dispatches_a_turn() {
        let (world, subscriber) = make_subscriber("a1", true).await;
        subscriber.on_message(&event("hello", HUMAN_SENDER)).await;

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let agent = world.get_agent("a1").await.unwrap();
        let agent = agent.lock().await;
        assert!(agent.memory.iter().any(|m| m.role == Role::Assistant && m.content == "ack"));
    }
}
