// src/lib.rs

//! Agent World: a multi-agent orchestration runtime.
//!
//! Humans and LLM-backed agents exchange messages inside a [`world::World`]; agents
//! decide autonomously whether to respond based on mention and turn rules, tool calls
//! may require human approval before execution, and every event is persisted in a
//! chat-scoped, sequence-numbered log.
//!
//! See the `world` module for the component breakdown (event bus, routing rules,
//! orchestrator, storage facade, approval/HITL protocol).

pub mod world;

// Re-export the types most callers need without walking the module tree.
pub use world::bus::{EventBus, EventHandler};
pub use world::orchestrator::Orchestrator;
pub use world::runtime::WorldRuntime;
pub use world::types::{Agent, Chat, ChatMessage, EventRecord, Role, ToolCall, World};
