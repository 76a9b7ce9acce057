//! Title generation subscriber (C11): on the first `idle` of a default-titled chat,
//! generates and compare-and-set commits a short title.

use crate::world::bus::{ActivityEventType, EventHandler, WorldChannelEvent, WorldSystemEvent};
use crate::world::llm::{LlmCompletion, LlmProvider, LlmRequest};
use crate::world::llm_queue::{with_completion_hook, LlmQueue};
use crate::world::storage::Storage;
use crate::world::types::{ChatMessage, Role, World, DEFAULT_CHAT_TITLE};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on the number of distinct user/assistant rows fed into the title
/// prompt. Plain constant per §4.C15's guidance on process-level settings.
pub const TITLE_TRANSCRIPT_BOUND: usize = 12;

pub struct TitleSubscriber<P: LlmProvider + 'static> {
    pub world: Arc<World>,
    pub storage: Arc<dyn Storage>,
    pub queue: Arc<LlmQueue>,
    pub provider: Arc<P>,
}

impl<P: LlmProvider + 'static> TitleSubscriber<P> {
    pub fn new(world: Arc<World>, storage: Arc<dyn Storage>, queue: Arc<LlmQueue>, provider: Arc<P>) -> Self {
        Self {
            world,
            storage,
            queue,
            provider,
        }
    }

    async fn handle_idle(&self) {
        let Some(target_chat_id) = self.world.current_chat_id.clone() else {
            return;
        };

        let Ok(chats) = self.storage.list_chats(&self.world.id).await else {
            return;
        };
        let Some(chat) = chats.into_iter().find(|c| c.id == target_chat_id) else {
            return;
        };
        if !chat.has_default_title() {
            return;
        }

        let transcript = self.build_transcript(&target_chat_id).await;
        if transcript.is_empty() {
            return;
        }

        let world_id = self.world.id.clone();
        let storage = self.storage.clone();
        let provider = self.provider.clone();
        let bus = self.world.bus.clone();
        let chat_id = target_chat_id.clone();
        let key = (world_id.clone(), chat_id.clone());
        let queue = self.queue.clone();
        let hook_world_id = world_id.clone();

        let work = with_completion_hook(queue.clone(), key, move |token| {
            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                let title = generate_title(provider.as_ref(), &transcript).await;
                if token.is_cancelled() {
                    return;
                }
                let commit = storage
                    .update_chat_title(&hook_world_id, &chat_id, DEFAULT_CHAT_TITLE, &title)
                    .await;
                if commit.is_ok() {
                    bus.emit_system(WorldSystemEvent {
                        content: format!("chat {chat_id} titled \"{title}\""),
                        message_id: Uuid::new_v4().to_string(),
                        timestamp: Utc::now(),
                        chat_id: Some(chat_id.clone()),
                    })
                    .await;
                }
            })
        });
        self.queue.submit(world_id, target_chat_id, work).await;
    }

    /// The most recent `TITLE_TRANSCRIPT_BOUND` distinct user/assistant rows for
    /// `chat_id`, drawn from every loaded agent's memory (tool rows excluded) and
    /// deduplicated by `(role, content)`.
    async fn build_transcript(&self, chat_id: &str) -> Vec<ChatMessage> {
        let agent_ids: Vec<String> = self.world.agents.read().await.keys().cloned().collect();
        let mut rows = Vec::new();
        for agent_id in agent_ids {
            let Some(handle) = self.world.get_agent(&agent_id).await else {
                continue;
            };
            let agent = handle.lock().await;
            for m in &agent.memory {
                if m.chat_id.as_deref() != Some(chat_id) {
                    continue;
                }
                if !matches!(m.role, Role::User | Role::Assistant) || m.content.trim().is_empty() {
                    continue;
                }
                rows.push(m.clone());
            }
        }
        rows.sort_by_key(|m| m.created_at);
        let mut seen = std::collections::HashSet::new();
        rows.retain(|m| seen.insert((m.role, m.content.clone())));
        let len = rows.len();
        if len > TITLE_TRANSCRIPT_BOUND {
            rows.drain(0..len - TITLE_TRANSCRIPT_BOUND);
        }
        rows
    }
}

async fn generate_title(provider: &impl LlmProvider, transcript: &[ChatMessage]) -> String {
    let mut messages = vec![ChatMessage::system(
        "Summarize this conversation in a short plain-text title of five words or fewer. \
         Respond with the title only, no quotes, no punctuation at the end, no \"Title:\" prefix.",
    )];
    messages.extend(transcript.iter().cloned());

    let request = LlmRequest {
        model: "title-generation".to_string(),
        temperature: 0.0,
        max_tokens: 32,
        messages,
        tools: Vec::new(),
    };

    let raw = match provider.complete(request).await {
        Ok(LlmCompletion { text: Some(t), .. }) => t,
        _ => String::new(),
    };

    sanitize_title(&raw).unwrap_or_else(|| fallback_title(transcript))
}

fn sanitize_title(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    for prefix in ["Title:", "title:", "Chat title:"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim();
        }
    }
    let s = s.trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '!' || c.is_whitespace());
    if s.is_empty() || s.len() > 80 {
        return None;
    }
    let lowered = s.to_lowercase();
    if lowered == "untitled" || lowered == "new chat" || lowered == "chat" {
        return None;
    }
    Some(s.to_string())
}

fn fallback_title(transcript: &[ChatMessage]) -> String {
    let first_user = transcript.iter().find(|m| m.role == Role::User);
    match first_user {
        Some(m) => {
            let words: Vec<&str> = m.content.split_whitespace().take(6).collect();
            if words.is_empty() {
                DEFAULT_CHAT_TITLE.to_string()
            } else {
                words.join(" ")
            }
        }
        None => DEFAULT_CHAT_TITLE.to_string(),
    }
}

#[async_trait]
impl<P: LlmProvider + 'static> EventHandler for TitleSubscriber<P> {
    async fn on_world(&self, event: &WorldChannelEvent) {
        if let WorldChannelEvent::Activity(activity) = event {
            if activity.event_type == ActivityEventType::Idle {
                self.handle_idle().await;
            }
        }
    }
}
