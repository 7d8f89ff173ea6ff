//! Proactive follow-up engine.
//!
//! A periodic cycle does two sweeps over the conversation store: deliver the
//! results of completed background tasks, and nudge sessions where the
//! assistant promised work and then went quiet. The model decides whether
//! there is anything worth saying — it answers with the sentinel token when
//! there is not — and the engine keeps control over whether anything is
//! actually persisted.

pub mod classify;
pub mod engine;
pub mod prompts;
pub mod scheduler;
pub mod sentinel;
pub mod store;
pub mod store_memory;
pub mod types;

pub use {
    engine::{ChatFn, ChatReply, ChatTurn, HeartbeatConfig, HeartbeatEngine},
    scheduler::spawn_heartbeat,
    sentinel::{HEARTBEAT_OK, strip_sentinel},
    store::HeartbeatStore,
    store_memory::MemoryHeartbeatStore,
    types::{
        ConversationMessage, HeartbeatReport, NewTask, PendingTask, Role, TaskStatus, TaskType,
    },
};
