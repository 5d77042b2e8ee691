//! Gateway session engine.
//!
//! One [`Session`] lives for the whole process. Each successful TCP connect
//! starts a new *generation*: the write half goes into the session state, the
//! read half goes to a reader task, and a heartbeat task is started next to
//! it. Both tasks hang off a per-generation [`CancellationToken`]; the first
//! read or write failure tears the generation down, cancels the token, and
//! the engine waits for both tasks to finish before backing off and
//! reconnecting.

use crate::codec::{self, FrameDecoder};
use crate::config::GatewayConfig;
use crate::model::Message;
use crate::router::{DeviceTables, MessageRouter, Routed};
use crate::stats::Counters;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const READ_BUFFER_SIZE: usize = 4096;
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Authenticating,
    Active,
    Failed,
    Backoff,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub addr: String,
    pub username: String,
    pub password: String,
    pub zkid: String,
    pub device_count: u32,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(gateway: &GatewayConfig) -> Self {
        Self {
            addr: format!("{}:{}", gateway.host, gateway.port),
            username: gateway.username.clone(),
            password: gateway.password.clone(),
            zkid: gateway.zkid.clone(),
            device_count: gateway.device_count,
            heartbeat_interval: Duration::from_secs(gateway.heartbeat_interval),
            reconnect_delay: Duration::from_secs(gateway.reconnect_delay_secs),
            connect_timeout: Duration::from_secs(gateway.connect_timeout_secs.max(1)),
        }
    }
}

#[derive(Default)]
struct SessionState {
    connected: bool,
    generation: u64,
    writer: Option<OwnedWriteHalf>,
    cancel: Option<CancellationToken>,
    tables: DeviceTables,
}

/// What a torn-down generation still needs closed, taken out under the lock.
struct Teardown {
    writer: Option<OwnedWriteHalf>,
    cancel: Option<CancellationToken>,
}

impl SessionState {
    fn teardown(&mut self) -> Option<Teardown> {
        if !self.connected {
            return None;
        }
        self.connected = false;
        Some(Teardown {
            writer: self.writer.take(),
            cancel: self.cancel.take(),
        })
    }
}

pub struct Session {
    settings: SessionSettings,
    router: MessageRouter,
    state: Mutex<SessionState>,
    phase: watch::Sender<SessionPhase>,
    counters: Arc<Counters>,
}

impl Session {
    pub fn new(settings: SessionSettings, router: MessageRouter, counters: Arc<Counters>) -> Arc<Self> {
        let (phase, _) = watch::channel(SessionPhase::Disconnected);
        Arc::new(Self {
            settings,
            router,
            state: Mutex::new(SessionState::default()),
            phase,
            counters,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    pub async fn device_state(&self, node_id: &str) -> Option<String> {
        self.state.lock().await.tables.devices.get(node_id).cloned()
    }

    /// Sends `msg` on the current generation.
    #[cfg(test)]
    pub async fn send(&self, msg: &Message) -> io::Result<()> {
        self.transmit(None, msg, |_| {}).await
    }

    /// Applies `update` to the device tables and sends `msg` under the same
    /// lock acquisition. `update` runs even when the gateway is unreachable.
    pub async fn send_with<F>(&self, msg: &Message, update: F) -> io::Result<()>
    where
        F: FnOnce(&mut DeviceTables),
    {
        self.transmit(None, msg, update).await
    }

    /// Runs the connect / authenticate / active / backoff cycle until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            self.set_phase(SessionPhase::Connecting);
            Counters::bump(&self.counters.connect_attempts);

            let connect = tokio::time::timeout(
                self.settings.connect_timeout,
                TcpStream::connect(&self.settings.addr),
            );
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = connect => outcome,
            };

            match outcome {
                Ok(Ok(stream)) => self.run_generation(stream, &shutdown).await,
                Ok(Err(err)) => {
                    tracing::warn!(addr = %self.settings.addr, error = %err, "gateway connect failed");
                }
                Err(_) => {
                    tracing::warn!(addr = %self.settings.addr, "gateway connect timed out");
                }
            }

            if shutdown.is_cancelled() {
                break;
            }

            self.set_phase(SessionPhase::Backoff);
            tracing::info!(
                delay_secs = self.settings.reconnect_delay.as_secs_f32(),
                "reconnecting to gateway after delay"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }

        let torn = self.state.lock().await.teardown();
        if let Some(torn) = torn {
            close(torn).await;
        }
        self.set_phase(SessionPhase::Disconnected);
        tracing::info!("gateway session stopped");
    }

    async fn run_generation(self: &Arc<Self>, stream: TcpStream, shutdown: &CancellationToken) {
        let conn_id = Uuid::new_v4();
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let cancel = shutdown.child_token();

        let generation = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.connected = true;
            state.writer = Some(write_half);
            state.cancel = Some(cancel.clone());
            state.generation
        };
        Counters::bump(&self.counters.generations);
        tracing::info!(%conn_id, generation, addr = %self.settings.addr, "connected to gateway");

        self.set_phase(SessionPhase::Authenticating);
        let login = Message::login(
            &self.settings.username,
            &self.settings.password,
            &self.settings.zkid,
        );
        if let Err(err) = self.transmit(Some(generation), &login, |_| {}).await {
            tracing::warn!(%conn_id, error = %err, "gateway login could not be sent");
            return;
        }

        // The login reply is not awaited; it is only logged when it arrives.
        self.set_phase(SessionPhase::Active);
        let reader = tokio::spawn(self.clone().read_loop(generation, conn_id, read_half, cancel.clone()));
        let heartbeat = tokio::spawn(self.clone().heartbeat_loop(generation, conn_id, cancel.clone()));

        self.seed_devices(generation, conn_id).await;

        cancel.cancelled().await;
        let _ = reader.await;
        let _ = heartbeat.await;
        tracing::debug!(%conn_id, generation, "gateway generation finished");
    }

    async fn seed_devices(&self, generation: u64, conn_id: Uuid) {
        for index in 1..=self.settings.device_count {
            let query = Message::query(index.to_string());
            if let Err(err) = self.transmit(Some(generation), &query, |_| {}).await {
                tracing::warn!(%conn_id, node_id = index, error = %err, "device query failed");
                return;
            }
        }
        tracing::debug!(%conn_id, devices = self.settings.device_count, "device state queried");
    }

    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        conn_id: Uuid,
        mut reader: OwnedReadHalf,
        cancel: CancellationToken,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = reader.read(&mut buf) => read,
            };
            let n = match read {
                Ok(0) => {
                    tracing::debug!(%conn_id, pending = decoder.pending(), "gateway sent eof");
                    self.fail(generation, "connection closed by gateway").await;
                    return;
                }
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(%conn_id, error = %err, "gateway read failed");
                    self.fail(generation, "read error").await;
                    return;
                }
            };

            let batch = decoder.push(&buf[..n]);
            Counters::add(&self.counters.frames_in, batch.messages.len() as u64);
            Counters::add(&self.counters.frames_dropped, batch.dropped as u64);
            if batch.messages.is_empty() {
                continue;
            }

            let mut state = self.state.lock().await;
            for msg in &batch.messages {
                match self.router.route(&mut state.tables, msg) {
                    Routed::Rejected(reason) => {
                        Counters::bump(&self.counters.messages_rejected);
                        tracing::debug!(%conn_id, node_id = %msg.node_id, ?reason, "gateway message rejected");
                    }
                    Routed::UnknownOpcode => Counters::bump(&self.counters.unknown_opcodes),
                    _ => {}
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, generation: u64, conn_id: Uuid, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let heartbeat = Message::heartbeat();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.transmit(Some(generation), &heartbeat, |_| {}).await {
                tracing::warn!(%conn_id, error = %err, "heartbeat send failed");
                return;
            }
        }
    }

    /// Serializes every socket write behind the session lock. A failed write
    /// tears the generation down before the error is returned.
    async fn transmit<F>(&self, generation: Option<u64>, msg: &Message, update: F) -> io::Result<()>
    where
        F: FnOnce(&mut DeviceTables),
    {
        let frame = codec::encode(msg).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let mut state = self.state.lock().await;
        update(&mut state.tables);

        let current = generation.map_or(true, |g| g == state.generation);
        if !state.connected || !current {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "gateway session is not connected",
            ));
        }

        let result = match state.writer.as_mut() {
            Some(writer) => write_frame(writer, &frame).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "gateway writer missing")),
        };

        if let Err(err) = &result {
            let torn = state.teardown();
            drop(state);
            if let Some(torn) = torn {
                tracing::warn!(opcode = %msg.opcode, error = %err, "gateway write failed");
                close(torn).await;
                self.set_phase(SessionPhase::Failed);
            }
        }
        result
    }

    async fn fail(&self, generation: u64, reason: &str) {
        let torn = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.teardown()
        };
        if let Some(torn) = torn {
            tracing::warn!(generation, reason, "gateway connection lost");
            close(torn).await;
            self.set_phase(SessionPhase::Failed);
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "session phase");
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &[u8]) -> io::Result<()> {
    let write = async {
        writer.write_all(frame).await?;
        writer.flush().await
    };
    match tokio::time::timeout(WRITE_TIMEOUT, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "gateway write timed out")),
    }
}

async fn close(torn: Teardown) {
    if let Some(mut writer) = torn.writer {
        let _ = writer.shutdown().await;
    }
    if let Some(cancel) = torn.cancel {
        cancel.cancel();
    }
}
