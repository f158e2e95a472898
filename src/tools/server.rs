use std::collections::HashMap;

use serde_json::{Value, json};

use super::tool::RobotTool;
use super::{JsonRpcRequest, JsonRpcResponse};

pub struct ToolServer {
    tools: HashMap<String, Box<dyn RobotTool>>,
}

impl ToolServer {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register_tool(&mut self, tool: Box<dyn RobotTool>) {
        log::info!("Registered tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Handle one JSON-RPC payload. Returns `Some(response_text)` for a
    /// request, `Some("")` for a notification that needs no reply, and
    /// `None` when the payload is not JSON-RPC at all.
    pub async fn handle_message(&self, payload: &str) -> Option<String> {
        let req: JsonRpcRequest = match serde_json::from_str(payload) {
            Ok(r) => r,
            Err(_) => return None,
        };

        if req.jsonrpc != "2.0" {
            return None;
        }

        // Per JSON-RPC 2.0, notifications carry no id and get no response
        if req.id.is_none() || req.method.starts_with("notifications") {
            log::info!("Tool notification received: {}", req.method);
            return Some(String::new());
        }

        let result = match req.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                }
            })),
            "tools/list" => {
                let tool_list: Vec<Value> = self
                    .tools
                    .values()
                    .map(|t| {
                        json!({
                            "name": t.name(),
                            "description": t.description(),
                            "inputSchema": t.input_schema(),
                        })
                    })
                    .collect();
                Ok(json!({ "tools": tool_list }))
            }
            "tools/call" => self.handle_tool_call(req.params).await,
            _ => Err(format!("Method not found: {}", req.method)),
        };

        let response = match result {
            Ok(res) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: req.id,
                result: Some(res),
                error: None,
            },
            Err(err) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: req.id,
                result: None,
                error: Some(json!({ "code": -32601, "message": err })),
            },
        };

        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                log::error!("Failed to encode tool response: {}", e);
                Some(String::new())
            }
        }
    }

    async fn handle_tool_call(&self, params: Option<Value>) -> Result<Value, String> {
        let params = params.ok_or("Missing parameters")?;
        let name = params
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or("Missing tool name")?;
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let Some(tool) = self.tools.get(name) else {
            return Err(format!("Tool {} not found", name));
        };
        let exec_result = tool.call(args).await?;

        // Standard MCP tool output shape
        let text = match exec_result.as_str() {
            Some(s) => s.to_string(),
            None => exec_result.to_string(),
        };
        Ok(json!({
            "content": [{ "type": "text", "text": text }]
        }))
    }
}
