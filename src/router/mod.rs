use crate::devices::DeviceRegistry;
use crate::model::{Message, Opcode, PowerState};
use crate::reconcile::{EntityStates, Reconciler};
use std::collections::HashMap;

/// Device and entity maps guarded by the session lock.
#[derive(Debug, Default)]
pub struct DeviceTables {
    /// Last raw token per node id, from reports or local commands.
    pub devices: HashMap<String, String>,
    pub entities: EntityStates,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Observed,
    Changed { entity_id: String, state: PowerState },
    Unchanged,
    Rejected(Reject),
    UnknownOpcode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    NonTextArg,
    UnknownToken,
    UnmappedNode,
}

/// Dispatches inbound gateway messages. Every handler is synchronous.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: DeviceRegistry,
    reconciler: Reconciler,
}

impl MessageRouter {
    pub fn new(registry: DeviceRegistry, reconciler: Reconciler) -> Self {
        Self {
            registry,
            reconciler,
        }
    }

    pub fn route(&self, tables: &mut DeviceTables, msg: &Message) -> Routed {
        match &msg.opcode {
            Opcode::Heartbeat => {
                tracing::debug!("gateway heartbeat acknowledged");
                Routed::Observed
            }
            Opcode::SyncInfo => {
                tracing::debug!(node_id = %msg.node_id, arg = ?msg.arg, "gateway sync info");
                Routed::Observed
            }
            Opcode::Login => {
                if msg.status.as_deref() == Some("success") {
                    tracing::info!("gateway login accepted");
                } else {
                    tracing::warn!(status = ?msg.status, "gateway login rejected");
                }
                Routed::Observed
            }
            Opcode::Switch => self.handle_switch(tables, msg),
            Opcode::Query | Opcode::Other(_) => {
                tracing::debug!(opcode = %msg.opcode, node_id = %msg.node_id, "unhandled gateway message");
                Routed::UnknownOpcode
            }
        }
    }

    fn handle_switch(&self, tables: &mut DeviceTables, msg: &Message) -> Routed {
        let Some(raw) = msg.arg.as_text() else {
            return Routed::Rejected(Reject::NonTextArg);
        };
        let Some(state) = PowerState::from_raw(raw) else {
            tracing::debug!(node_id = %msg.node_id, raw, "ignoring unknown switch token");
            return Routed::Rejected(Reject::UnknownToken);
        };

        tables.devices.insert(msg.node_id.clone(), raw.to_string());

        let Some((class, entity_id)) = self.registry.resolve(&msg.node_id) else {
            return Routed::Rejected(Reject::UnmappedNode);
        };
        tracing::debug!(node_id = %msg.node_id, ?class, entity_id, state = %state, "switch report");

        if self.reconciler.reconcile(&mut tables.entities, entity_id, state) {
            Routed::Changed {
                entity_id: entity_id.to_string(),
                state,
            }
        } else {
            Routed::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Arg, REQUESTER};
    use crate::reconcile::StateUpdate;
    use serde_json::{Map, Value};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn router() -> (MessageRouter, UnboundedReceiver<StateUpdate>) {
        let registry = DeviceRegistry::new(
            HashMap::from([("3".to_string(), "bedroom_curtain".to_string())]),
            HashMap::from([("5".to_string(), "hall_light".to_string())]),
        );
        let (reconciler, rx) = Reconciler::channel();
        (MessageRouter::new(registry, reconciler), rx)
    }

    fn report(node: &str, opcode: Opcode, arg: Arg) -> Message {
        Message {
            node_id: node.to_string(),
            opcode,
            arg,
            requester: REQUESTER.to_string(),
            req_id: None,
            status: None,
        }
    }

    fn switch(node: &str, raw: &str) -> Message {
        report(node, Opcode::Switch, Arg::Text(raw.to_string()))
    }

    #[test]
    fn switch_report_updates_maps_and_queues_sink_update() {
        let (router, mut rx) = router();
        let mut tables = DeviceTables::default();

        let routed = router.route(&mut tables, &switch("5", "ON"));
        assert_eq!(
            routed,
            Routed::Changed {
                entity_id: "hall_light".to_string(),
                state: PowerState::On
            }
        );
        assert_eq!(tables.devices["5"], "ON");
        assert_eq!(tables.entities.get("hall_light"), Some(PowerState::On));
        assert_eq!(rx.try_recv().unwrap().entity_id, "hall_light");
    }

    #[test]
    fn curtain_tokens_normalize_like_lights() {
        let (router, mut rx) = router();
        let mut tables = DeviceTables::default();

        router.route(&mut tables, &switch("3", "OPEN"));
        router.route(&mut tables, &switch("3", "CLOSE"));

        assert_eq!(tables.devices["3"], "CLOSE");
        assert_eq!(rx.try_recv().unwrap().state, PowerState::On);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.entity_id, "bedroom_curtain");
        assert_eq!(second.state, PowerState::Off);
    }

    #[test]
    fn repeated_report_is_unchanged() {
        let (router, mut rx) = router();
        let mut tables = DeviceTables::default();
        router.route(&mut tables, &switch("5", "OFF"));
        assert_eq!(router.route(&mut tables, &switch("5", "OFF")), Routed::Unchanged);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_token_is_fully_inert() {
        let (router, mut rx) = router();
        let mut tables = DeviceTables::default();
        assert_eq!(
            router.route(&mut tables, &switch("5", "FOO")),
            Routed::Rejected(Reject::UnknownToken)
        );
        assert!(tables.devices.is_empty());
        assert!(tables.entities.get("hall_light").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn non_text_switch_arg_is_dropped() {
        let (router, mut rx) = router();
        let mut tables = DeviceTables::default();
        let msg = report("5", Opcode::Switch, Arg::Object(Map::new()));
        assert_eq!(router.route(&mut tables, &msg), Routed::Rejected(Reject::NonTextArg));
        let msg = report("5", Opcode::Switch, Arg::Other(Value::from(1)));
        assert_eq!(router.route(&mut tables, &msg), Routed::Rejected(Reject::NonTextArg));
        assert!(tables.devices.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unmapped_node_records_raw_state_without_sink_call() {
        let (router, mut rx) = router();
        let mut tables = DeviceTables::default();
        assert_eq!(
            router.route(&mut tables, &switch("42", "ON")),
            Routed::Rejected(Reject::UnmappedNode)
        );
        assert_eq!(tables.devices["42"], "ON");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_opcode_touches_nothing() {
        let (router, mut rx) = router();
        let mut tables = DeviceTables::default();
        let msg = report("5", Opcode::Other("DIMMER".to_string()), Arg::Text("ON".to_string()));
        assert_eq!(router.route(&mut tables, &msg), Routed::UnknownOpcode);
        assert!(tables.devices.is_empty());
        assert!(tables.entities.get("hall_light").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn observational_opcodes_leave_state_alone() {
        let (router, mut rx) = router();
        let mut tables = DeviceTables::default();
        let mut login = report("*", Opcode::Login, Arg::default());
        login.status = Some("fail".to_string());
        assert_eq!(router.route(&mut tables, &login), Routed::Observed);
        let hb = report("*", Opcode::Heartbeat, Arg::Text("*".to_string()));
        assert_eq!(router.route(&mut tables, &hb), Routed::Observed);
        let sync = report("*", Opcode::SyncInfo, Arg::Object(Map::new()));
        assert_eq!(router.route(&mut tables, &sync), Routed::Observed);
        assert!(tables.devices.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
