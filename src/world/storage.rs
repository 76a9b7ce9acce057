//! The storage facade (C1): a backend-agnostic `Storage` trait plus the in-memory
//! reference backend used throughout the test suite.
//!
//! Grounded on the grounding repo's storage-facing traits being plain async traits
//! over `Result<_, E>` rather than a query-builder DSL; IDs and sequence numbers are
//! assigned by the facade, never the backend, per `SPEC_FULL.md` §4.C1.

use crate::world::error::StorageError;
use crate::world::types::{Agent, Chat, EventRecord, EventRecordType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The persisted, serializable projection of a [`crate::world::types::World`]. The
/// live `World` also owns a bus and an activity tracker, neither of which is
/// persisted — only the configuration fields are.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorldRecord {
    pub id: String,
    pub name: String,
    pub main_agent: Option<String>,
    pub variables: String,
    pub current_chat_id: Option<String>,
    pub turn_limit: usize,
}

impl WorldRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            main_agent: None,
            variables: String::new(),
            current_chat_id: None,
            turn_limit: crate::world::types::DEFAULT_TURN_LIMIT,
        }
    }
}

/// Filter/paging parameters for [`Storage::get_events_by_world_and_chat`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub world_id: String,
    pub chat_id: Option<String>,
    pub record_type: Option<EventRecordType>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub start_seq: Option<u64>,
    pub end_seq: Option<u64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl EventQuery {
    pub fn new(world_id: impl Into<String>) -> Self {
        Self {
            world_id: world_id.into(),
            ..Default::default()
        }
    }

    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_world(&self, world: WorldRecord) -> Result<(), StorageError>;
    async fn load_world(&self, world_id: &str) -> Result<WorldRecord, StorageError>;
    async fn delete_world(&self, world_id: &str) -> Result<(), StorageError>;
    async fn list_worlds(&self) -> Result<Vec<WorldRecord>, StorageError>;

    async fn save_agent(&self, agent: Agent) -> Result<(), StorageError>;
    async fn load_agent(&self, world_id: &str, agent_id: &str) -> Result<Agent, StorageError>;
    async fn delete_agent(&self, world_id: &str, agent_id: &str) -> Result<(), StorageError>;
    async fn list_agents(&self, world_id: &str) -> Result<Vec<Agent>, StorageError>;

    async fn save_chat(&self, chat: Chat) -> Result<(), StorageError>;
    async fn list_chats(&self, world_id: &str) -> Result<Vec<Chat>, StorageError>;
    async fn delete_chat(&self, world_id: &str, chat_id: &str) -> Result<(), StorageError>;
    /// Compare-and-set title update: fails with `StorageError::Conflict` unless the
    /// chat's current title equals `expected_old_title`.
    async fn update_chat_title(
        &self,
        world_id: &str,
        chat_id: &str,
        expected_old_title: &str,
        new_title: &str,
    ) -> Result<(), StorageError>;

    /// Assigns the next monotonic `seq` for `(world_id, chat_id)` atomically and
    /// returns it.
    async fn append_event(
        &self,
        world_id: &str,
        chat_id: Option<&str>,
        record_type: EventRecordType,
        payload: serde_json::Value,
        meta: Option<serde_json::Value>,
    ) -> Result<u64, StorageError>;

    async fn get_events_by_world_and_chat(
        &self,
        query: EventQuery,
    ) -> Result<Vec<EventRecord>, StorageError>;

    async fn delete_events_by_world_and_chat(
        &self,
        world_id: &str,
        chat_id: &str,
    ) -> Result<(), StorageError>;
}

#[derive(Default)]
struct InMemoryData {
    worlds: HashMap<String, WorldRecord>,
    agents: HashMap<(String, String), Agent>,
    chats: HashMap<(String, String), Chat>,
    events: Vec<EventRecord>,
    next_seq: HashMap<(String, String), u64>,
}

/// `tokio::sync::Mutex`-guarded in-memory backend satisfying every `Storage`
/// invariant (compare-and-set title updates, atomic per-key `seq` assignment, atomic
/// cascade delete) without pulling in an embedded SQL engine.
#[derive(Default)]
pub struct InMemoryStorage {
    data: Mutex<InMemoryData>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_world(&self, world: WorldRecord) -> Result<(), StorageError> {
        self.data.lock().await.worlds.insert(world.id.clone(), world);
        Ok(())
    }

    async fn load_world(&self, world_id: &str) -> Result<WorldRecord, StorageError> {
        self.data
            .lock()
            .await
            .worlds
            .get(world_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(world_id.to_string()))
    }

    async fn delete_world(&self, world_id: &str) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        data.worlds.remove(world_id);
        data.agents.retain(|(w, _), _| w != world_id);
        data.chats.retain(|(w, _), _| w != world_id);
        data.events.retain(|e| e.world_id != world_id);
        data.next_seq.retain(|(w, _), _| w != world_id);
        Ok(())
    }

    async fn list_worlds(&self) -> Result<Vec<WorldRecord>, StorageError> {
        Ok(self.data.lock().await.worlds.values().cloned().collect())
    }

    async fn save_agent(&self, agent: Agent) -> Result<(), StorageError> {
        let key = (agent.world_id.clone(), agent.id.clone());
        self.data.lock().await.agents.insert(key, agent);
        Ok(())
    }

    async fn load_agent(&self, world_id: &str, agent_id: &str) -> Result<Agent, StorageError> {
        self.data
            .lock()
            .await
            .agents
            .get(&(world_id.to_string(), agent_id.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(agent_id.to_string()))
    }

    async fn delete_agent(&self, world_id: &str, agent_id: &str) -> Result<(), StorageError> {
        self.data
            .lock()
            .await
            .agents
            .remove(&(world_id.to_string(), agent_id.to_string()));
        Ok(())
    }

    async fn list_agents(&self, world_id: &str) -> Result<Vec<Agent>, StorageError> {
        Ok(self
            .data
            .lock()
            .await
            .agents
            .iter()
            .filter(|((w, _), _)| w == world_id)
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn save_chat(&self, chat: Chat) -> Result<(), StorageError> {
        let key = (chat.world_id.clone(), chat.id.clone());
        self.data.lock().await.chats.insert(key, chat);
        Ok(())
    }

    async fn list_chats(&self, world_id: &str) -> Result<Vec<Chat>, StorageError> {
        Ok(self
            .data
            .lock()
            .await
            .chats
            .iter()
            .filter(|((w, _), _)| w == world_id)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn delete_chat(&self, world_id: &str, chat_id: &str) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        data.chats.remove(&(world_id.to_string(), chat_id.to_string()));
        data.events
            .retain(|e| !(e.world_id == world_id && e.chat_id.as_deref() == Some(chat_id)));
        Ok(())
    }

    async fn update_chat_title(
        &self,
        world_id: &str,
        chat_id: &str,
        expected_old_title: &str,
        new_title: &str,
    ) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        let key = (world_id.to_string(), chat_id.to_string());
        let chat = data
            .chats
            .get_mut(&key)
            .ok_or_else(|| StorageError::NotFound(chat_id.to_string()))?;
        if chat.title != expected_old_title {
            return Err(StorageError::Conflict(format!(
                "expected title {:?}, found {:?}",
                expected_old_title, chat.title
            )));
        }
        chat.title = new_title.to_string();
        chat.updated_at = Utc::now();
        Ok(())
    }

    async fn append_event(
        &self,
        world_id: &str,
        chat_id: Option<&str>,
        record_type: EventRecordType,
        payload: serde_json::Value,
        meta: Option<serde_json::Value>,
    ) -> Result<u64, StorageError> {
        let mut data = self.data.lock().await;
        let seq_key = (world_id.to_string(), chat_id.unwrap_or("").to_string());
        let seq = {
            let entry = data.next_seq.entry(seq_key).or_insert(0);
            *entry += 1;
            *entry
        };
        let record = EventRecord {
            id: Uuid::new_v4().to_string(),
            world_id: world_id.to_string(),
            chat_id: chat_id.map(|c| c.to_string()),
            seq,
            record_type,
            payload,
            meta,
            created_at: Utc::now(),
        };
        data.events.push(record);
        Ok(seq)
    }

    async fn get_events_by_world_and_chat(
        &self,
        query: EventQuery,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let data = self.data.lock().await;
        let mut matched: Vec<EventRecord> = data
            .events
            .iter()
            .filter(|e| e.world_id == query.world_id)
            .filter(|e| query.chat_id.is_none() || e.chat_id.as_deref() == query.chat_id.as_deref())
            .filter(|e| query.record_type.is_none() || Some(e.record_type) == query.record_type)
            .filter(|e| query.start_seq.map_or(true, |s| e.seq >= s))
            .filter(|e| query.end_seq.map_or(true, |s| e.seq <= s))
            .filter(|e| query.start_date.map_or(true, |d| e.created_at >= d))
            .filter(|e| query.end_date.map_or(true, |d| e.created_at <= d))
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.seq);

        if let Some(offset) = query.offset {
            matched = matched.into_iter().skip(offset).collect();
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn delete_events_by_world_and_chat(
        &self,
        world_id: &str,
        chat_id: &str,
    ) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        data.events
            .retain(|e| !(e.world_id == world_id && e.chat_id.as_deref() == Some(chat_id)));
        data.next_seq
            .remove(&(world_id.to_string(), chat_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::types::Chat;

    #[tokio::test]
    async fn seq_is_monotonic_per_world_and_chat() {
        let storage = InMemoryStorage::new();
        let s1 = storage
            .append_event("w1", Some("c1"), EventRecordType::Message, serde_json::json!({}), None)
            .await
            .unwrap();
        let s2 = storage
            .append_event("w1", Some("c1"), EventRecordType::Message, serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!((s1, s2), (1, 2));
    }

    #[tokio::test]
    async fn seq_counters_are_independent_per_chat() {
        let storage = InMemoryStorage::new();
        let a = storage
            .append_event("w1", Some("c1"), EventRecordType::Message, serde_json::json!({}), None)
            .await
            .unwrap();
        let b = storage
            .append_event("w1", Some("c2"), EventRecordType::Message, serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!((a, b), (1, 1));
    }

    #[tokio::test]
    async fn update_chat_title_is_compare_and_set() {
        let storage = InMemoryStorage::new();
        storage.save_chat(Chat::new("c1", "w1")).await.unwrap();

        storage
            .update_chat_title("w1", "c1", "New Chat", "Renamed")
            .await
            .unwrap();

        let stale_update = storage
            .update_chat_title("w1", "c1", "New Chat", "Other")
            .await;
        assert!(matches!(stale_update, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn delete_world_cascades_to_agents_chats_and_events() {
        let storage = InMemoryStorage::new();
        storage.save_world(WorldRecord::new("w1", "World")).await.unwrap();
        storage.save_chat(Chat::new("c1", "w1")).await.unwrap();
        storage
            .append_event("w1", Some("c1"), EventRecordType::Message, serde_json::json!({}), None)
            .await
            .unwrap();

        storage.delete_world("w1").await.unwrap();

        assert!(storage.load_world("w1").await.is_err());
        assert!(storage.list_chats("w1").await.unwrap().is_empty());
        let events = storage
            .get_events_by_world_and_chat(EventQuery::new("w1"))
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn tool_calls_round_trip_through_agent_save_and_load() {
        let storage = InMemoryStorage::new();
        let mut agent = Agent::new("a1", "w1", "Agent One");
        agent.memory.push(
            crate::world::types::ChatMessage::assistant("running a tool", "a1").with_tool_calls(vec![
                crate::world::types::ToolCall::new("tc1", "shell_cmd", serde_json::json!({"cmd": "ls"})),
            ]),
        );
        storage.save_agent(agent).await.unwrap();

        let loaded = storage.load_agent("w1", "a1").await.unwrap();
        assert_eq!(loaded.memory[0].tool_calls[0].name, "shell_cmd");
        assert_eq!(loaded.memory[0].tool_calls[0].parsed_arguments()["cmd"], "ls");
    }
}
