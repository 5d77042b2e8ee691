use crate::command::CommandGateway;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct ServerState {
    commands: CommandGateway,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    arg: String,
}

#[derive(Debug, Clone, Copy)]
enum DeviceKind {
    Switch,
    Curtain,
}

impl DeviceKind {
    fn field(self) -> &'static str {
        match self {
            Self::Switch => "is_active",
            Self::Curtain => "is_open",
        }
    }

    fn active_token(self) -> &'static str {
        match self {
            Self::Switch => "ON",
            Self::Curtain => "OPEN",
        }
    }

    fn body(self, raw: Option<&str>) -> Json<serde_json::Value> {
        let mut body = serde_json::Map::new();
        body.insert(
            self.field().to_string(),
            json!(raw == Some(self.active_token())),
        );
        Json(body.into())
    }
}

pub async fn start(
    host: &str,
    port: u16,
    commands: CommandGateway,
    token: Option<String>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = bind(host, port).await?;
    serve(listener, commands, token, shutdown).await
}

/// Binds the REST listener; `host` may be a name such as `localhost`.
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(%addr, "rest api listening");
    Ok(listener)
}

pub async fn serve(
    listener: TcpListener,
    commands: CommandGateway,
    token: Option<String>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let state = Arc::new(ServerState {
        commands,
        token: token.filter(|t| !t.trim().is_empty()),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/switch/:id", get(read_switch).post(command_switch))
        .route("/curtain/:id", get(read_curtain).post(command_curtain))
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
}

async fn command_switch(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<CommandBody>, JsonRejection>,
) -> Response {
    submit_command(&state, &headers, DeviceKind::Switch, &id, body).await
}

async fn command_curtain(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<CommandBody>, JsonRejection>,
) -> Response {
    submit_command(&state, &headers, DeviceKind::Curtain, &id, body).await
}

async fn read_switch(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    read_device(&state, &headers, DeviceKind::Switch, &id).await
}

async fn read_curtain(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    read_device(&state, &headers, DeviceKind::Curtain, &id).await
}

async fn submit_command(
    state: &ServerState,
    headers: &HeaderMap,
    kind: DeviceKind,
    id: &str,
    body: Result<Json<CommandBody>, JsonRejection>,
) -> Response {
    if !is_token_valid(headers, state.token.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(node_id = id, error = %rejection, "rejected command body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request" })),
            )
                .into_response();
        }
    };

    // Delivery problems stay on the gateway side; the caller always gets an answer.
    state.commands.send_command(id, &body.arg).await;
    kind.body(Some(&body.arg)).into_response()
}

async fn read_device(state: &ServerState, headers: &HeaderMap, kind: DeviceKind, id: &str) -> Response {
    if !is_token_valid(headers, state.token.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let raw = state.commands.read_state(id).await;
    kind.body(raw.as_deref()).into_response()
}

fn is_token_valid(headers: &HeaderMap, token: Option<&str>) -> bool {
    let Some(token) = token else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|provided| provided == token)
        .unwrap_or(false)
}

async fn health_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let session = state.commands.session();
    let connected = session.is_connected().await;
    (
        StatusCode::OK,
        Json(json!({
            "phase": session.phase(),
            "connected": connected,
            "counters": session.counters().snapshot(),
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::{session, settings, unused_addr};
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
    use serde_json::Value;

    async fn spawn_api(token: Option<&str>) -> (String, CancellationToken) {
        let (session, _rx) = session(settings(unused_addr().await));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let token = token.map(str::to_string);
        tokio::spawn(async move {
            serve(listener, CommandGateway::new(session), token, stop)
                .await
                .unwrap();
        });
        (base, shutdown)
    }

    async fn post(base: &str, path: &str, body: &str) -> (reqwest::StatusCode, Value) {
        let resp = reqwest::Client::new()
            .post(format!("{base}{path}"))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn get_json(base: &str, path: &str) -> (reqwest::StatusCode, Value) {
        let resp = reqwest::get(format!("{base}{path}")).await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn switch_command_answers_and_is_cached() {
        let (base, shutdown) = spawn_api(None).await;

        let (status, body) = post(&base, "/switch/5", r#"{"arg":"ON"}"#).await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body, json!({ "is_active": true }));

        let (_, body) = get_json(&base, "/switch/5").await;
        assert_eq!(body, json!({ "is_active": true }));

        let (_, body) = post(&base, "/switch/5", r#"{"arg":"OFF"}"#).await;
        assert_eq!(body, json!({ "is_active": false }));
        let (_, body) = get_json(&base, "/switch/5").await;
        assert_eq!(body, json!({ "is_active": false }));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn curtain_uses_open_token() {
        let (base, shutdown) = spawn_api(None).await;

        let (_, body) = post(&base, "/curtain/3", r#"{"arg":"OPEN"}"#).await;
        assert_eq!(body, json!({ "is_open": true }));
        let (_, body) = get_json(&base, "/curtain/3").await;
        assert_eq!(body, json!({ "is_open": true }));

        // A curtain reading "ON" is not open.
        post(&base, "/curtain/4", r#"{"arg":"ON"}"#).await;
        let (_, body) = get_json(&base, "/curtain/4").await;
        assert_eq!(body, json!({ "is_open": false }));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn unknown_device_reads_inactive() {
        let (base, shutdown) = spawn_api(None).await;
        let (status, body) = get_json(&base, "/switch/99").await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body, json!({ "is_active": false }));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (base, shutdown) = spawn_api(None).await;
        let (status, body) = post(&base, "/switch/5", r#"{"nope":1}"#).await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Invalid request" }));

        let (_, body) = get_json(&base, "/switch/5").await;
        assert_eq!(body, json!({ "is_active": false }));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn token_is_enforced_when_configured() {
        let (base, shutdown) = spawn_api(Some("rest-token")).await;

        let (status, _) = get_json(&base, "/switch/5").await;
        assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);

        let resp = reqwest::Client::new()
            .get(format!("{base}/switch/5"))
            .header(AUTHORIZATION, "Bearer rest-token")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let (status, _) = get_json(&base, "/health").await;
        assert_eq!(status, reqwest::StatusCode::OK);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn health_reports_session_phase_and_counters() {
        let (base, shutdown) = spawn_api(None).await;
        let (status, body) = get_json(&base, "/health").await;
        assert_eq!(status, reqwest::StatusCode::OK);
        assert_eq!(body["phase"], "disconnected");
        assert_eq!(body["connected"], false);
        assert_eq!(body["counters"]["connect_attempts"], 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn binds_by_host_name() {
        let listener = bind("localhost", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn start_serves_on_a_named_host() {
        let port = {
            let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
            reserved.local_addr().unwrap().port()
        };
        let (session, _rx) = session(settings(unused_addr().await));
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(start(
            "localhost",
            port,
            CommandGateway::new(session),
            None,
            shutdown.clone(),
        ));

        let base = format!("http://localhost:{port}");
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        let status = loop {
            match reqwest::get(format!("{base}/health")).await {
                Ok(resp) => break resp.status(),
                Err(err) => {
                    assert!(std::time::Instant::now() < deadline, "server never came up: {err}");
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                }
            }
        };
        assert_eq!(status, reqwest::StatusCode::OK);

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[test]
    fn token_check_accepts_only_matching_bearer() {
        let mut headers = HeaderMap::new();
        assert!(is_token_valid(&headers, None));
        assert!(!is_token_valid(&headers, Some("t")));
        headers.insert("authorization", "Bearer wrong".parse().unwrap());
        assert!(!is_token_valid(&headers, Some("t")));
        headers.insert("authorization", "Bearer t".parse().unwrap());
        assert!(is_token_valid(&headers, Some("t")));
    }
}
