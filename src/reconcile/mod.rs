use crate::homeassistant::HomeAssistantClient;
use crate::model::PowerState;
use crate::stats::Counters;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Last normalized state pushed downstream, per entity.
#[derive(Debug, Default)]
pub struct EntityStates {
    states: HashMap<String, PowerState>,
}

impl EntityStates {
    pub fn get(&self, entity_id: &str) -> Option<PowerState> {
        self.states.get(entity_id).copied()
    }

    /// Returns `false` when `state` is already recorded for the entity.
    pub fn record(&mut self, entity_id: &str, state: PowerState) -> bool {
        if self.get(entity_id) == Some(state) {
            return false;
        }
        self.states.insert(entity_id.to_string(), state);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub entity_id: String,
    pub state: PowerState,
}

/// De-duplicates entity transitions and queues the changed ones for the sink worker.
#[derive(Debug, Clone)]
pub struct Reconciler {
    tx: mpsc::UnboundedSender<StateUpdate>,
}

impl Reconciler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StateUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Records the new state before the push is queued; a failed push never rolls it back.
    pub fn reconcile(&self, entities: &mut EntityStates, entity_id: &str, state: PowerState) -> bool {
        if !entities.record(entity_id, state) {
            tracing::debug!(entity_id, state = %state, "entity state unchanged");
            return false;
        }
        let update = StateUpdate {
            entity_id: entity_id.to_string(),
            state,
        };
        if self.tx.send(update).is_err() {
            tracing::warn!(entity_id, state = %state, "sink worker stopped; state update lost");
        }
        true
    }
}

/// Drains queued updates into Home Assistant one at a time. Failures are
/// logged and counted, never retried.
pub async fn run_sink_worker(
    client: HomeAssistantClient,
    mut rx: mpsc::UnboundedReceiver<StateUpdate>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(update) => update,
                None => break,
            },
        };

        match client.push_state(&update.entity_id, update.state).await {
            Ok(()) => {
                Counters::bump(&counters.sink_pushes);
                tracing::info!(
                    entity_id = %update.entity_id,
                    state = %update.state,
                    "home assistant state updated"
                );
            }
            Err(err) => {
                Counters::bump(&counters.sink_failures);
                tracing::warn!(
                    entity_id = %update.entity_id,
                    state = %update.state,
                    error = %err,
                    "home assistant update failed"
                );
            }
        }
    }
    tracing::debug!("sink worker stopped");
}
