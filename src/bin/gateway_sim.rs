use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const REQUESTER: &str = "HJ_Gateway";
const MAX_PENDING: usize = 64 * 1024;

type Devices = Arc<Mutex<HashMap<String, String>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "gateway simulator listening");

    let devices: Devices = Arc::new(Mutex::new(HashMap::new()));
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "bridge connected");
        let devices = devices.clone();
        tokio::spawn(async move {
            match serve_bridge(stream, devices).await {
                Ok(()) => tracing::info!(%peer, "bridge disconnected"),
                Err(err) => tracing::warn!(%peer, error = %err, "bridge session error"),
            }
        });
    }
}

async fn serve_bridge(mut stream: TcpStream, devices: Devices) -> std::io::Result<()> {
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);

        while let Some(end) = pending.iter().position(|b| *b == b'$') {
            let frame: Vec<u8> = pending.drain(..=end).collect();
            let Some(body) = frame[..end].strip_prefix(b"!") else {
                tracing::warn!("frame without leading sentinel");
                continue;
            };
            let msg: Value = match serde_json::from_slice(body) {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::warn!(error = %err, "undecodable frame");
                    continue;
                }
            };
            for reply in respond(&msg, &devices) {
                let mut out = b"!".to_vec();
                out.extend_from_slice(reply.to_string().as_bytes());
                out.push(b'$');
                stream.write_all(&out).await?;
            }
        }
        if pending.len() > MAX_PENDING {
            pending.clear();
        }
    }
}

fn respond(msg: &Value, devices: &Devices) -> Vec<Value> {
    let node = msg["nodeid"].as_str().unwrap_or("*").to_string();
    let opcode = msg["opcode"].as_str().unwrap_or_default();
    tracing::info!(%node, opcode, arg = %msg["arg"], "frame from bridge");

    match opcode {
        "LOGIN" => vec![json!({
            "nodeid": "*",
            "opcode": "LOGIN",
            "arg": "*",
            "requester": REQUESTER,
            "status": "success",
        })],
        "CCU_HB" => vec![json!({
            "nodeid": "*",
            "opcode": "CCU_HB",
            "arg": "*",
            "requester": REQUESTER,
        })],
        "QUERY" => {
            let state = devices
                .lock()
                .map(|d| d.get(&node).cloned())
                .ok()
                .flatten()
                .unwrap_or_else(|| "OFF".to_string());
            vec![switch_report(&node, &state)]
        }
        "SWITCH" => {
            let Some(arg) = msg["arg"].as_str() else {
                return Vec::new();
            };
            if let Ok(mut d) = devices.lock() {
                d.insert(node.clone(), arg.to_string());
            }
            vec![switch_report(&node, arg)]
        }
        _ => Vec::new(),
    }
}

fn switch_report(node: &str, state: &str) -> Value {
    json!({
        "nodeid": node,
        "opcode": "SWITCH",
        "arg": state,
        "requester": REQUESTER,
        "reqId": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    })
}
