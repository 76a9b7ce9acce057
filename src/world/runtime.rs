//! Wiring a [`World`] up for live traffic: attaching the event-persistence
//! subscriber (C2), the title subscriber (C11), and one message subscriber (C8) per
//! loaded agent.
//!
//! Grounded on the lifecycle note in `SPEC_FULL.md` §3 ("loading attaches an
//! event-persistence subscriber and subscribes each agent... a subscriber is attached
//! on load and detached on unload").

use crate::world::approval_cache::ApprovalCache;
use crate::world::bus::HandlerId;
use crate::world::llm::LlmProvider;
use crate::world::llm_queue::LlmQueue;
use crate::world::orchestrator::Orchestrator;
use crate::world::persistence::{PersistenceMode, PersistenceSubscriber};
use crate::world::storage::Storage;
use crate::world::subscriber::MessageSubscriber;
use crate::world::title::TitleSubscriber;
use crate::world::tool::ToolRegistry;
use crate::world::types::{Agent, World};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A fully wired world: the orchestrator plus every subscriber needed to drive
/// traffic end to end. Constructed once per loaded world.
pub struct WorldRuntime<P: LlmProvider + 'static> {
    pub world: Arc<World>,
    pub storage: Arc<dyn Storage>,
    pub tools: Arc<ToolRegistry>,
    pub approvals: Arc<ApprovalCache>,
    pub queue: Arc<LlmQueue>,
    pub orchestrator: Arc<Orchestrator<P>>,
    agent_handlers: Mutex<HashMap<String, HandlerId>>,
}

impl<P: LlmProvider + 'static> WorldRuntime<P> {
    /// Attach persistence, title generation, and a message subscriber for every
    /// agent currently loaded into `world`.
    pub async fn load(
        world: Arc<World>,
        storage: Arc<dyn Storage>,
        tools: Arc<ToolRegistry>,
        provider: Arc<P>,
        persistence_mode: PersistenceMode,
    ) -> Arc<Self> {
        let approvals = Arc::new(ApprovalCache::new());
        let queue = Arc::new(LlmQueue::new());
        let orchestrator = Arc::new(Orchestrator::new(
            world.clone(),
            storage.clone(),
            tools.clone(),
            approvals.clone(),
            provider.clone(),
        ));

        world
            .bus
            .subscribe(Arc::new(PersistenceSubscriber::new(
                storage.clone(),
                world.id.clone(),
                persistence_mode,
            )))
            .await;
        world
            .bus
            .subscribe(Arc::new(TitleSubscriber::new(
                world.clone(),
                storage.clone(),
                queue.clone(),
                provider,
            )))
            .await;

        let runtime = Arc::new(Self {
            world: world.clone(),
            storage,
            tools,
            approvals,
            queue,
            orchestrator,
            agent_handlers: Mutex::new(HashMap::new()),
        });

        let agent_ids: Vec<String> = world.agents.read().await.keys().cloned().collect();
        for agent_id in agent_ids {
            runtime.load_agent_subscriber(&agent_id).await;
        }

        runtime
    }

    /// Insert `agent` into the world and attach its message subscriber. Use this
    /// (rather than `World::insert_agent` directly) once a runtime exists, so the
    /// agent actually receives dispatched turns.
    pub async fn load_agent(&self, agent: Agent) {
        let agent_id = agent.id.clone();
        self.world.insert_agent(agent).await;
        self.load_agent_subscriber(&agent_id).await;
    }

    async fn load_agent_subscriber(&self, agent_id: &str) {
        let handler = Arc::new(MessageSubscriber::new(
            self.world.clone(),
            agent_id,
            self.queue.clone(),
            self.orchestrator.clone(),
        ));
        let id = self.world.bus.subscribe(handler).await;
        self.agent_handlers.lock().await.insert(agent_id.to_string(), id);
    }

    /// Detach `agent_id`'s message subscriber and remove it from the world.
    pub async fn unload_agent(&self, agent_id: &str) {
        if let Some(handler_id) = self.agent_handlers.lock().await.remove(agent_id) {
            self.world.bus.unsubscribe(handler_id).await;
        }
        self.world.remove_agent(agent_id).await;
    }

    /// `stopMessage` (§6): cancel whatever's running or queued for `chat_id` in this
    /// world. See [`crate::world::llm_queue::LlmQueue::stop_message`] for the
    /// `Stopped`/`NoActiveProcess` distinction.
    pub async fn stop_message(&self, chat_id: &str) -> crate::world::llm_queue::StopOutcome {
        self.queue.stop_message(&self.world.id, chat_id).await
    }
}
