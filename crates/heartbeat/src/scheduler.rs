//! Periodic driver for the heartbeat engine.

use std::{sync::Arc, time::Duration};

use {tokio_util::sync::CancellationToken, tracing::info};

use crate::engine::HeartbeatEngine;

/// Default cycle cadence.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the heartbeat loop. Cancel the returned token to stop it.
///
/// The engine itself refuses overlapping cycles, so a cycle that overruns
/// the interval simply causes the next tick to no-op.
pub fn spawn_heartbeat(engine: Arc<HeartbeatEngine>, interval: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "heartbeat scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("heartbeat scheduler stopped");
                    break;
                },
                _ = ticker.tick() => {
                    let _ = engine.run().await;
                },
            }
        }
    });
    cancel
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::{ChatFn, ChatReply, HeartbeatConfig};
    use crate::store_memory::MemoryHeartbeatStore;

    #[tokio::test(start_paused = true)]
    async fn scheduler_ticks_and_cancels() {
        let store = Arc::new(MemoryHeartbeatStore::new());
        let chat: ChatFn = Arc::new(|_turn| {
            Box::pin(async {
                Ok(ChatReply {
                    text: "unused".into(),
                    model: "m".into(),
                })
            })
        });
        let engine = Arc::new(HeartbeatEngine::new(store, chat, HeartbeatConfig::default()));

        let cancel = spawn_heartbeat(engine, Duration::from_secs(60));
        // Let a few virtual minutes elapse; the loop must neither panic nor
        // wedge, and cancellation must end it.
        tokio::time::sleep(Duration::from_secs(181)).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
