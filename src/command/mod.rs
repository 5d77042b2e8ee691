use crate::model::Message;
use crate::session::Session;
use crate::stats::Counters;
use std::sync::Arc;

/// Entry point the REST layer uses to drive devices through the gateway session.
#[derive(Clone)]
pub struct CommandGateway {
    session: Arc<Session>,
}

impl CommandGateway {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Sends a SWITCH command and records `raw` as the node's state without
    /// waiting for the gateway. Returns whether the frame reached the socket;
    /// gateway-side failures are never surfaced beyond that.
    pub async fn send_command(&self, node_id: &str, raw: &str) -> bool {
        let msg = Message::switch(node_id, raw);
        let node = node_id.to_string();
        let value = raw.to_string();
        let sent = self
            .session
            .send_with(&msg, move |tables| {
                tables.devices.insert(node, value);
            })
            .await;

        match sent {
            Ok(()) => {
                Counters::bump(&self.session.counters().commands_sent);
                tracing::info!(node_id, arg = raw, req_id = ?msg.req_id, "command sent to gateway");
                true
            }
            Err(err) => {
                tracing::warn!(node_id, arg = raw, error = %err, "command not delivered to gateway");
                false
            }
        }
    }

    pub async fn read_state(&self, node_id: &str) -> Option<String> {
        self.session.device_state(node_id).await
    }
}
