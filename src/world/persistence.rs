//! Event persistence subscriber (C2): attaches to every bus channel and mirrors each
//! emission into the storage facade as an [`EventRecord`](crate::world::types::EventRecord),
//! unmodified.

use crate::world::bus::{
    EventHandler, WorldChannelEvent, WorldMessageEvent, WorldSSEEvent, WorldSystemEvent,
};
use crate::world::storage::Storage;
use crate::world::types::EventRecordType;
use async_trait::async_trait;
use std::sync::Arc;

/// Whether persistence writes are awaited inline or fired off in the background.
/// Tests require [`PersistenceMode::Sync`] so assertions can observe a write
/// immediately after the triggering emission returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    Sync,
    Async,
}

pub struct PersistenceSubscriber {
    storage: Arc<dyn Storage>,
    world_id: String,
    mode: PersistenceMode,
}

impl PersistenceSubscriber {
    pub fn new(storage: Arc<dyn Storage>, world_id: impl Into<String>, mode: PersistenceMode) -> Self {
        Self {
            storage,
            world_id: world_id.into(),
            mode,
        }
    }

    async fn persist(
        &self,
        chat_id: Option<String>,
        record_type: EventRecordType,
        payload: serde_json::Value,
        meta: Option<serde_json::Value>,
    ) {
        let storage = self.storage.clone();
        let world_id = self.world_id.clone();
        let write = async move {
            if let Err(e) = storage
                .append_event(&world_id, chat_id.as_deref(), record_type, payload, meta)
                .await
            {
                log::error!("failed to persist {record_type:?} event for world {world_id}: {e}");
            }
        };

        match self.mode {
            PersistenceMode::Sync => write.await,
            PersistenceMode::Async => {
                tokio::spawn(write);
            }
        }
    }
}

#[async_trait]
impl EventHandler for PersistenceSubscriber {
    async fn on_message(&self, event: &WorldMessageEvent) {
        let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        self.persist(Some(event.chat_id.clone()), EventRecordType::Message, payload, None)
            .await;
    }

    async fn on_sse(&self, event: &WorldSSEEvent) {
        let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        self.persist(Some(event.chat_id.clone()), EventRecordType::Sse, payload, None)
            .await;
    }

    async fn on_world(&self, event: &WorldChannelEvent) {
        let chat_id = match event {
            WorldChannelEvent::Tool(t) => Some(t.chat_id.clone()),
            WorldChannelEvent::Activity(_) => None,
        };
        let meta = serde_json::json!({"type": event.type_name()});
        let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        self.persist(chat_id, EventRecordType::World, payload, Some(meta)).await;
    }

    async fn on_system(&self, event: &WorldSystemEvent) {
        let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        self.persist(event.chat_id.clone(), EventRecordType::System, payload, None)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::bus::{ActivityEventType, EventBus, WorldActivityEvent};
    use crate::world::error::StorageError;
    use crate::world::storage::{EventQuery, InMemoryStorage, WorldRecord};
    use crate::world::types::{Agent, Chat};
    use async_trait::async_trait;
    use chrono::Utc;

    #[tokio::test]
    async fn sync_mode_persists_before_emit_returns() {
        let storage = Arc::new(InMemoryStorage::new());
        let bus = EventBus::new();
        bus.subscribe(Arc::new(PersistenceSubscriber::new(
            storage.clone(),
            "w1",
            PersistenceMode::Sync,
        )))
        .await;

        bus.emit_message(WorldMessageEvent {
            content: "hi".to_string(),
            sender: "HUMAN".to_string(),
            message_id: "m1".to_string(),
            timestamp: Utc::now(),
            chat_id: "c1".to_string(),
            reply_to_message_id: None,
        })
        .await;

        let events = storage
            .get_events_by_world_and_chat(EventQuery::new("w1").with_chat("c1"))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record_type, EventRecordType::Message);
    }

    #[tokio::test]
    async fn async_mode_persists_eventually() {
        let storage = Arc::new(InMemoryStorage::new());
        let bus = EventBus::new();
        bus.subscribe(Arc::new(PersistenceSubscriber::new(
            storage.clone(),
            "w1",
            PersistenceMode::Async,
        )))
        .await;

        bus.emit_system(WorldSystemEvent {
            content: "notice".to_string(),
            message_id: "m1".to_string(),
            timestamp: Utc::now(),
            chat_id: None,
        })
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let events = storage
            .get_events_by_world_and_chat(EventQuery::new("w1"))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].record_type, EventRecordType::System);
    }

    #[tokio::test]
    async fn world_tool_events_carry_their_chat_id() {
        let storage = Arc::new(InMemoryStorage::new());
        let bus = EventBus::new();
        bus.subscribe(Arc::new(PersistenceSubscriber::new(
            storage.clone(),
            "w1",
            PersistenceMode::Sync,
        )))
        .await;

        bus.emit_world(WorldChannelEvent::Activity(WorldActivityEvent {
            event_type: ActivityEventType::Idle,
            pending_operations: 0,
            activity_id: 1,
            timestamp: Utc::now(),
            source: None,
            active_sources: vec![],
        }))
        .await;

        let events = storage
            .get_events_by_world_and_chat(EventQuery::new("w1"))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].chat_id.is_none());
        assert_eq!(events[0].meta.as_ref().unwrap()["type"], "idle");
    }

    struct FailingStorage;

    #[async_trait]
    impl Storage for FailingStorage {
        async fn save_world(&self, _world: WorldRecord) -> Result<(), StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn load_world(&self, _world_id: &str) -> Result<WorldRecord, StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn delete_world(&self, _world_id: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn list_worlds(&self) -> Result<Vec<WorldRecord>, StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn save_agent(&self, _agent: Agent) -> Result<(), StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn load_agent(&self, _world_id: &str, _agent_id: &str) -> Result<Agent, StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn delete_agent(&self, _world_id: &str, _agent_id: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn list_agents(&self, _world_id: &str) -> Result<Vec<Agent>, StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn save_chat(&self, _chat: Chat) -> Result<(), StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn list_chats(&self, _world_id: &str) -> Result<Vec<Chat>, StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn delete_chat(&self, _world_id: &str, _chat_id: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn update_chat_title(
            &self,
            _world_id: &str,
            _chat_id: &str,
            _expected_old_title: &str,
            _new_title: &str,
        ) -> Result<(), StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn append_event(
            &self,
            _world_id: &str,
            _chat_id: Option<&str>,
            _record_type: EventRecordType,
            _payload: serde_json::Value,
            _meta: Option<serde_json::Value>,
        ) -> Result<u64, StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn get_events_by_world_and_chat(
            &self,
            _query: EventQuery,
        ) -> Result<Vec<crate::world::types::EventRecord>, StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
        async fn delete_events_by_world_and_chat(
            &self,
            _world_id: &str,
            _chat_id: &str,
        ) -> Result<(), StorageError> {
            Err(StorageError::Backend("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn storage_failure_never_propagates_out_of_the_handler() {
        let bus = EventBus::new();
        bus.subscribe(Arc::new(PersistenceSubscriber::new(
            Arc::new(FailingStorage),
            "w1",
            PersistenceMode::Sync,
        )))
        .await;

        bus.emit_message(WorldMessageEvent {
            content: "hi".to_string(),
            sender: "HUMAN".to_string(),
            message_id: "m1".to_string(),
            timestamp: Utc::now(),
            chat_id: "c1".to_string(),
            reply_to_message_id: None,
        })
        .await;
    }
}
