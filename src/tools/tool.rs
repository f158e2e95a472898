use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::services::motion::MotionService;

#[async_trait]
pub trait RobotTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn call(&self, params: Value) -> Result<Value, String>;
}

/// Lists the arm gesture recordings the agent can play.
pub struct AvailableRecordingsTool {
    arms: Arc<MotionService>,
}

impl AvailableRecordingsTool {
    pub fn new(arms: Arc<MotionService>) -> Self {
        Self { arms }
    }
}

#[async_trait]
impl RobotTool for AvailableRecordingsTool {
    fn name(&self) -> &str {
        "get_available_recordings"
    }

    fn description(&self) -> &str {
        "Discover your physical expressions! Lists the choreographed arm movements \
         you can perform for body language, like head tilts, nods or excitement wiggles."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn call(&self, _params: Value) -> Result<Value, String> {
        log::info!("Tool call: get_available_recordings");
        let recordings = self.arms.available_recordings();
        if recordings.is_empty() {
            Ok(json!("No recordings found."))
        } else {
            Ok(json!(format!(
                "Available recordings: {}",
                recordings.join(", ")
            )))
        }
    }
}

/// Starts an arm gesture by recording name. Playback is asynchronous; the
/// reply only acknowledges the dispatch.
pub struct PlayRecordingTool {
    arms: Arc<MotionService>,
}

impl PlayRecordingTool {
    pub fn new(arms: Arc<MotionService>) -> Self {
        Self { arms }
    }
}

#[async_trait]
impl RobotTool for PlayRecordingTool {
    fn name(&self) -> &str {
        "play_recording"
    }

    fn description(&self) -> &str {
        "Express yourself through physical movement! Plays a recorded gesture to show \
         personality and emotion. Use get_available_recordings first to see the options."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recording_name": {
                    "type": "string",
                    "description": "Name of the gesture recording to perform",
                }
            },
            "required": ["recording_name"],
        })
    }

    async fn call(&self, params: Value) -> Result<Value, String> {
        let name = params
            .get("recording_name")
            .and_then(|n| n.as_str())
            .ok_or("Missing recording_name")?;
        log::info!("Tool call: play_recording \"{}\"", name);
        if self.arms.play(name) {
            Ok(json!(format!("Started playing recording: {}", name)))
        } else {
            Ok(json!(format!(
                "Error playing recording {}: a stop is in progress",
                name
            )))
        }
    }
}

/// Robot health summary for the agent.
pub struct ConfigurationTool;

#[async_trait]
impl RobotTool for ConfigurationTool {
    fn name(&self) -> &str {
        "get_configuration"
    }

    fn description(&self) -> &str {
        "Get the status of the robot."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn call(&self, _params: Value) -> Result<Value, String> {
        // TODO: report per-service health once the services expose it here
        Ok(json!("Status: Nominal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_recording_schema_requires_name() {
        let tool_schema = PlayRecordingTool {
            arms: Arc::new(dummy_service()),
        }
        .input_schema();
        assert_eq!(tool_schema["required"][0], "recording_name");
        assert_eq!(
            tool_schema["properties"]["recording_name"]["type"],
            "string"
        );
    }

    #[tokio::test]
    async fn play_recording_rejects_missing_argument() {
        let tool = PlayRecordingTool {
            arms: Arc::new(dummy_service()),
        };
        let err = tool.call(json!({})).await.unwrap_err();
        assert_eq!(err, "Missing recording_name");
    }

    fn dummy_service() -> MotionService {
        use crate::recordings::RecordingStore;
        use crate::robot::NullSink;
        let dir = std::env::temp_dir().join("lekiwi-tool-tests");
        MotionService::arms(RecordingStore::new(dir), Arc::new(NullSink), 30).unwrap()
    }
}
