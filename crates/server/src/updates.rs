//! Agent update watcher
//!
//! Polls the `agent_updates` queue for `[UPDATE]` lines addressed to the
//! current foreground session and surfaces them on the wrapper's stderr
//! (above the TUI), marking each row acknowledged.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::orchestrator::{short_session_id, Orchestrator};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub fn spawn_update_watcher(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        loop {
            interval.tick().await;
            let (current, shutting_down) = {
                let state = orchestrator.state.lock().await;
                (state.current_session_id.clone(), state.shutting_down)
            };
            if shutting_down {
                return;
            }

            let updates = match orchestrator.store.unacknowledged_updates(&current) {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(
                        component = "updates",
                        event = "updates.poll_failed",
                        error = %e,
                        "Failed to poll agent updates"
                    );
                    continue;
                }
            };

            for update in updates {
                eprintln!(
                    "[{}] {}",
                    short_session_id(&update.session_id),
                    update.update_text
                );
                if let Err(e) = orchestrator.store.acknowledge_update(update.id) {
                    warn!(
                        component = "updates",
                        event = "updates.ack_failed",
                        update_id = update.id,
                        error = %e,
                        "Failed to acknowledge agent update"
                    );
                }
            }
        }
    });
}
