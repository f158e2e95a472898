//! JSON-RPC tool gateway for the voice agent.
//!
//! The agent drives the robot body through MCP-style tool calls carried
//! inside the WebSocket session. This module owns the registry and the
//! built-in tools; the link forwards `mcp` envelopes here and sends the
//! reply back on the same session.

pub mod server;
pub mod tool;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use server::ToolServer;

use crate::services::motion::MotionService;
use tool::{AvailableRecordingsTool, ConfigurationTool, PlayRecordingTool};

#[derive(Deserialize, Debug)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Build a server with the built-in robot tools registered. Gestures play
/// on the arm service; wheel recordings stay CLI-only.
pub fn builtin_server(arms: Arc<MotionService>) -> ToolServer {
    let mut server = ToolServer::new();
    server.register_tool(Box::new(AvailableRecordingsTool::new(arms.clone())));
    server.register_tool(Box::new(PlayRecordingTool::new(arms)));
    server.register_tool(Box::new(ConfigurationTool));
    server
}
