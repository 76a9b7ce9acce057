//! The approval cache (C6): session-scoped `(chatId, toolName) -> approved` memory.
//!
//! Kept as a plain world-owned object per the REDESIGN FLAGS in `SPEC_FULL.md` §9
//! ("Singleton shared registries... keep them as world-scoped objects").

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct ApprovalCacheEntry {
    pub approved: bool,
    pub ts: DateTime<Utc>,
}

#[derive(Default)]
pub struct ApprovalCache {
    entries: Mutex<HashMap<(String, String), ApprovalCacheEntry>>,
}

impl ApprovalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, chat_id: impl Into<String>, tool_name: impl Into<String>, approved: bool) {
        let key = (chat_id.into(), tool_name.into());
        self.entries.lock().await.insert(
            key,
            ApprovalCacheEntry {
                approved,
                ts: Utc::now(),
            },
        );
    }

    pub async fn get(&self, chat_id: &str, tool_name: &str) -> Option<ApprovalCacheEntry> {
        self.entries
            .lock()
            .await
            .get(&(chat_id.to_string(), tool_name.to_string()))
            .cloned()
    }

    pub async fn is_approved(&self, chat_id: &str, tool_name: &str) -> bool {
        self.get(chat_id, tool_name)
            .await
            .map(|e| e.approved)
            .unwrap_or(false)
    }

    pub async fn clear(&self, chat_id: &str) {
        self.entries
            .lock()
            .await
            .retain(|(cid, _), _| cid != chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_scope_is_per_chat_and_tool() {
        let cache = ApprovalCache::new();
        cache.set("c1", "shell_cmd", true).await;

        assert!(cache.is_approved("c1", "shell_cmd").await);
        assert!(!cache.is_approved("c2", "shell_cmd").await);
        assert!(!cache.is_approved("c1", "other_tool").await);
    }

    #[tokio::test]
    async fn clear_drops_only_that_chat() {
        let cache = ApprovalCache::new();
        cache.set("c1", "shell_cmd", true).await;
        cache.set("c2", "shell_cmd", true).await;

        cache.clear("c1").await;

        assert!(!cache.is_approved("c1", "shell_cmd").await);
        assert!(cache.is_approved("c2", "shell_cmd").await);
    }
}
