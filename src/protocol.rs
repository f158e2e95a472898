//! Wire messages for the voice-agent link.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Inbound signalling message. Fields we do not know are ignored, so
/// server-side protocol additions do not break the device.
#[derive(Deserialize, Debug, Clone)]
pub struct AgentMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub state: Option<String>,
    pub text: Option<String>,
    pub session_id: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Serialize)]
struct AudioParams {
    format: String,
    sample_rate: u32,
    channels: u8,
    frame_duration: u32,
}

#[derive(Serialize)]
struct Features {
    mcp: bool,
}

#[derive(Serialize)]
struct HelloMessage {
    #[serde(rename = "type")]
    msg_type: String,
    version: u8,
    transport: String,
    features: Features,
    audio_params: AudioParams,
}

/// Hello sent once per connection. Audio leaves the device as mono Opus
/// whatever the capture layout is, so `channels` is fixed at 1.
pub fn hello(sample_rate: u32, frame_duration_ms: u32) -> Result<String> {
    let msg = HelloMessage {
        msg_type: "hello".to_string(),
        version: 1,
        transport: "websocket".to_string(),
        features: Features { mcp: true },
        audio_params: AudioParams {
            format: "opus".to_string(),
            sample_rate,
            channels: 1,
            frame_duration: frame_duration_ms,
        },
    };
    Ok(serde_json::to_string(&msg)?)
}

/// Open-mic listen request. The server keeps the turn loop going as long
/// as we re-send this after every reply.
pub fn listen_start(session_id: &str) -> Result<String> {
    let msg = json!({
        "session_id": session_id,
        "type": "listen",
        "state": "start",
        "mode": "auto",
    });
    Ok(serde_json::to_string(&msg)?)
}

/// Device-originated status event, e.g. fall detection transitions.
pub fn status_event(session_id: &str, event_type: &str, payload: Value) -> Result<String> {
    let msg = json!({
        "session_id": session_id,
        "type": "status",
        "event": event_type,
        "payload": payload,
    });
    Ok(serde_json::to_string(&msg)?)
}

/// Wrap a JSON-RPC reply back into the transport envelope it arrived in.
pub fn mcp_envelope(session_id: &str, payload: Value) -> Result<String> {
    let msg = json!({
        "type": "mcp",
        "session_id": session_id,
        "payload": payload,
    });
    Ok(serde_json::to_string(&msg)?)
}
