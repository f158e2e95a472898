//! WebSocket link to the voice-agent server.
//!
//! Owns the connection lifecycle: identity headers, the hello handshake,
//! reconnect backoff, and in-place answering of tool traffic. Everything
//! else is surfaced to the controller as [`AgentEvent`]s.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use mac_address::get_mac_address;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::protocol;
use crate::tools::ToolServer;

#[derive(Debug)]
pub enum AgentEvent {
    Text(String),
    Binary(Vec<u8>),
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub enum AgentCommand {
    SendText(String),
    SendBinary(Vec<u8>),
}

/// Stable identifiers sent in the connect headers. The server keys device
/// state on these, so they must survive restarts.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub client_id: String,
}

impl DeviceIdentity {
    /// MAC address as the device id where one exists, a persisted UUID
    /// otherwise. The client id is always a persisted UUID.
    pub fn resolve(state_dir: &Path) -> Self {
        let device_id = match get_mac_address() {
            Ok(Some(mac)) => mac.to_string().to_lowercase(),
            _ => persisted_uuid(state_dir, "device_id"),
        };
        let client_id = persisted_uuid(state_dir, "client_id");
        Self {
            device_id,
            client_id,
        }
    }
}

fn persisted_uuid(state_dir: &Path, file: &str) -> String {
    let path = state_dir.join(file);
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return existing.to_string();
        }
    }
    let fresh = Uuid::new_v4().to_string();
    let write = std::fs::create_dir_all(state_dir).and_then(|_| std::fs::write(&path, &fresh));
    if let Err(e) = write {
        log::warn!("Cannot persist {} at {}: {}", file, path.display(), e);
    }
    fresh
}

pub struct AgentLink {
    config: Config,
    identity: DeviceIdentity,
    tx: mpsc::Sender<AgentEvent>,
    rx_cmd: mpsc::Receiver<AgentCommand>,
    tools: Arc<ToolServer>,
}

impl AgentLink {
    pub fn new(
        config: Config,
        identity: DeviceIdentity,
        tx: mpsc::Sender<AgentEvent>,
        rx_cmd: mpsc::Receiver<AgentCommand>,
        tools: Arc<ToolServer>,
    ) -> Self {
        Self {
            config,
            identity,
            tx,
            rx_cmd,
            tools,
        }
    }

    /// Run until the command channel closes. Connection failures reconnect
    /// with a doubled delay, reset once a connect succeeds.
    pub async fn run(mut self) {
        let mut retry_delay = 1u64;
        loop {
            match self.connect_and_loop(&mut retry_delay).await {
                Ok(()) => break,
                Err(e) => {
                    log::warn!("Agent link down: {:#}. Reconnecting in {}s", e, retry_delay);
                    let _ = self.tx.send(AgentEvent::Disconnected).await;
                    tokio::time::sleep(Duration::from_secs(retry_delay)).await;
                    retry_delay = (retry_delay * 2).min(60);
                }
            }
        }
        log::info!("Agent link shut down");
    }

    async fn connect_and_loop(&mut self, retry_delay: &mut u64) -> Result<()> {
        let url = Url::parse(&self.config.agent.url).context("Bad agent.url")?;
        let host = url.host_str().context("agent.url has no host")?;

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.config.agent.url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header(
                "Authorization",
                format!("Bearer {}", self.config.agent.token),
            )
            .header("Device-Id", &self.identity.device_id)
            .header("Client-Id", &self.identity.client_id)
            .header("Protocol-Version", "1")
            .body(())?;

        log::info!("Connecting to {}", self.config.agent.url);
        let (ws_stream, _) = connect_async(request).await?;
        log::info!("Agent link up");
        *retry_delay = 1;

        let (mut write, mut read) = ws_stream.split();

        self.tx.send(AgentEvent::Connected).await?;

        let hello = protocol::hello(self.config.audio.sample_rate, self.config.audio.frame_ms)?;
        log::debug!("Hello: {}", hello);
        write.send(Message::Text(hello.into())).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match self.answer_tool_traffic(&text).await {
                                Some(reply) if !reply.is_empty() => {
                                    log::debug!("Tool reply: {}", reply);
                                    write.send(Message::Text(reply.into())).await?;
                                }
                                Some(_) => {}
                                None => self.tx.send(AgentEvent::Text(text.to_string())).await?,
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.tx.send(AgentEvent::Binary(data.to_vec())).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(anyhow!("Server closed connection: {:?}", frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(anyhow!("Connection closed")),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(AgentCommand::SendText(text)) => {
                            write.send(Message::Text(text.into())).await?;
                        }
                        Some(AgentCommand::SendBinary(data)) => {
                            write.send(Message::Binary(data.into())).await?;
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Answer an inbound `mcp` envelope without involving the controller.
    /// `None` means the frame is not tool traffic; `Some("")` means it was
    /// handled with nothing to send back.
    async fn answer_tool_traffic(&self, text: &str) -> Option<String> {
        let envelope: Value = serde_json::from_str(text).ok()?;
        if envelope.get("type").and_then(|t| t.as_str()) != Some("mcp") {
            return None;
        }
        let payload = envelope.get("payload")?;
        log::debug!("Tool request: {}", payload);
        let reply = self.tools.handle_message(&payload.to_string()).await?;
        if reply.is_empty() {
            return Some(String::new());
        }
        let session_id = envelope
            .get("session_id")
            .and_then(|s| s.as_str())
            .unwrap_or("");
        let reply_payload = serde_json::from_str(&reply).unwrap_or(Value::Null);
        match protocol::mcp_envelope(session_id, reply_payload) {
            Ok(text) => Some(text),
            Err(e) => {
                log::error!("Cannot encode tool reply: {}", e);
                Some(String::new())
            }
        }
    }
}
