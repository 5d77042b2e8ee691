use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Requester tag the gateway expects on every frame this bridge sends.
pub const REQUESTER: &str = "HJ_Server";
/// Node id addressing the gateway itself.
pub const BROADCAST_NODE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Opcode {
    Login,
    Heartbeat,
    SyncInfo,
    Switch,
    Query,
    Other(String),
}

impl Opcode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "LOGIN",
            Self::Heartbeat => "CCU_HB",
            Self::SyncInfo => "SYNC_INFO",
            Self::Switch => "SWITCH",
            Self::Query => "QUERY",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for Opcode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "LOGIN" => Self::Login,
            "CCU_HB" => Self::Heartbeat,
            "SYNC_INFO" => Self::SyncInfo,
            "SWITCH" => Self::Switch,
            "QUERY" => Self::Query,
            _ => Self::Other(raw),
        }
    }
}

impl From<Opcode> for String {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `arg` field. SWITCH, QUERY and CCU_HB carry text, LOGIN carries an
/// object; anything else the gateway sends lands in `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Text(String),
    Object(Map<String, Value>),
    Other(Value),
}

impl Default for Arg {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

impl Arg {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "nodeid", default)]
    pub node_id: String,
    pub opcode: Opcode,
    #[serde(default)]
    pub arg: Arg,
    #[serde(default)]
    pub requester: String,
    #[serde(rename = "reqId", default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Message {
    pub fn login(username: &str, password: &str, zkid: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("username".into(), Value::from(username));
        fields.insert("password".into(), Value::from(password));
        fields.insert("zkid".into(), Value::from(zkid));
        // The gateway rejects logins that omit these, even though they are always empty.
        fields.insert("seq".into(), Value::from(""));
        fields.insert("device".into(), Value::from(""));
        fields.insert("version".into(), Value::from(""));
        Self {
            node_id: BROADCAST_NODE.to_string(),
            opcode: Opcode::Login,
            arg: Arg::Object(fields),
            requester: REQUESTER.to_string(),
            req_id: None,
            status: None,
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            node_id: BROADCAST_NODE.to_string(),
            opcode: Opcode::Heartbeat,
            arg: Arg::Text(BROADCAST_NODE.to_string()),
            requester: REQUESTER.to_string(),
            req_id: None,
            status: None,
        }
    }

    pub fn query(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            opcode: Opcode::Query,
            arg: Arg::Text(BROADCAST_NODE.to_string()),
            requester: REQUESTER.to_string(),
            req_id: Some(request_id()),
            status: None,
        }
    }

    pub fn switch(node_id: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            opcode: Opcode::Switch,
            arg: Arg::Text(raw.into()),
            requester: REQUESTER.to_string(),
            req_id: Some(request_id()),
            status: None,
        }
    }
}

/// Request ids are unix seconds; the gateway only echoes them back.
pub fn request_id() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Two-valued state pushed to the home-automation sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    /// Maps a raw gateway token; unknown tokens yield `None`.
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw {
            "ON" | "OPEN" => Some(Self::On),
            "OFF" | "CLOSE" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
