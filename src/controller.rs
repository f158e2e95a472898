//! Central event dispatch.
//!
//! The controller owns the conversation state and fans events out: agent
//! frames drive the speaker and the mute flag, mic frames stream up while
//! unmuted, pose transitions become status events, and a fresh connection
//! triggers the wake-up gesture.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tokio::sync::mpsc;

use crate::agent_link::{AgentCommand, AgentEvent};
use crate::protocol::{self, AgentMessage};
use crate::services::motion::MotionService;
use crate::services::pose::PoseStatus;
use crate::state::SystemState;

/// Gesture played when the agent link comes up. Missing recordings are
/// logged by the arms worker, not here.
const WAKE_GESTURE: &str = "wake_up";

pub struct RobotController {
    state: SystemState,
    session_id: Option<String>,
    muted: Arc<AtomicBool>,
    agent_tx: mpsc::Sender<AgentCommand>,
    speaker_tx: mpsc::Sender<Vec<u8>>,
    arms: Arc<MotionService>,
}

impl RobotController {
    pub fn new(
        agent_tx: mpsc::Sender<AgentCommand>,
        speaker_tx: mpsc::Sender<Vec<u8>>,
        arms: Arc<MotionService>,
        muted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state: SystemState::Idle,
            session_id: None,
            muted,
            agent_tx,
            speaker_tx,
            arms,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub async fn handle_agent_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Text(text) => self.process_agent_text(&text).await,
            AgentEvent::Binary(data) => self.process_agent_audio(data).await,
            AgentEvent::Connected => {
                log::info!("Agent connected");
                self.state = SystemState::Idle;
                self.arms.play(WAKE_GESTURE);
            }
            AgentEvent::Disconnected => {
                log::warn!("Agent disconnected");
                self.state = SystemState::NetworkError;
                self.muted.store(false, Ordering::Relaxed);
            }
        }
    }

    async fn process_agent_text(&mut self, text: &str) {
        let msg: AgentMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(_) => {
                log::debug!("Non-JSON text frame ignored: {}", text);
                return;
            }
        };

        if let Some(sid) = &msg.session_id {
            if self.session_id.as_deref() != Some(sid) {
                log::info!("New session: {}", sid);
                self.session_id = Some(sid.clone());
            }
        }

        match msg.msg_type.as_str() {
            "hello" => {
                log::info!("Agent hello received, starting listen mode");
                self.send_listen_start("").await;
            }
            "tts" => {
                match msg.state.as_deref() {
                    Some("start") => {
                        self.muted.store(true, Ordering::Relaxed);
                        self.state = SystemState::Speaking;
                        log::debug!("TTS started, mic muted");
                    }
                    Some("stop") => {
                        self.muted.store(false, Ordering::Relaxed);
                        self.state = SystemState::Listening;
                        log::debug!("TTS stopped, mic unmuted");
                        let sid = self.session_id.clone().unwrap_or_default();
                        self.send_listen_start(&sid).await;
                    }
                    _ => {}
                }
                if let Some(t) = msg.text {
                    log::info!("Agent says: {}", t);
                }
            }
            "stt" => {
                if let Some(t) = msg.text {
                    log::info!("Heard: {}", t);
                }
            }
            other => {
                log::debug!("Unhandled message type: {}", other);
            }
        }
    }

    async fn process_agent_audio(&mut self, data: Vec<u8>) {
        if self.state != SystemState::Speaking {
            self.state = SystemState::Speaking;
            log::debug!("Agent audio streaming");
        }
        if let Err(e) = self.speaker_tx.send(data).await {
            log::warn!("Speaker queue closed: {}", e);
        }
    }

    async fn send_listen_start(&self, session_id: &str) {
        match protocol::listen_start(session_id) {
            Ok(text) => {
                if let Err(e) = self.agent_tx.send(AgentCommand::SendText(text)).await {
                    log::warn!("Cannot send listen command: {}", e);
                }
            }
            Err(e) => log::error!("Cannot encode listen command: {}", e),
        }
    }

    /// One encoded mic frame from the capture thread. Dropped while muted
    /// so the agent never hears its own TTS.
    pub async fn handle_mic_frame(&mut self, data: Vec<u8>) {
        if self.muted.load(Ordering::Relaxed) {
            return;
        }
        if self.state != SystemState::Listening {
            self.state = SystemState::Listening;
            log::debug!("Mic streaming");
        }
        if let Err(e) = self.agent_tx.send(AgentCommand::SendBinary(data)).await {
            log::warn!("Cannot send mic frame: {}", e);
        }
    }

    /// A fall/recovery transition from the pose watch service.
    pub async fn handle_pose_event(&mut self, status: PoseStatus) {
        if status.fallen {
            log::error!(
                "Person fallen (score {:.2}, ratio {:.2})",
                status.score,
                status.ratio
            );
        } else {
            log::info!("Person stable again (score {:.2})", status.score);
        }
        let sid = self.session_id.clone().unwrap_or_default();
        let payload = json!({
            "score": status.score,
            "ratio": status.ratio,
            "timestamp": status.timestamp,
        });
        match protocol::status_event(&sid, status.event_type(), payload) {
            Ok(text) => {
                if let Err(e) = self.agent_tx.send(AgentCommand::SendText(text)).await {
                    log::warn!("Cannot send status event: {}", e);
                }
            }
            Err(e) => log::error!("Cannot encode status event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recordings::{RecordingStore, TimedArmRow};
    use crate::robot::{ActionSink, ArmPose, RobotAction};
    use anyhow::Result;
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    struct CollectingSink(Mutex<Vec<RobotAction>>);

    impl ActionSink for CollectingSink {
        fn send(&self, action: &RobotAction) -> Result<()> {
            self.0.lock().unwrap().push(*action);
            Ok(())
        }
    }

    struct Fixture {
        controller: RobotController,
        agent_rx: mpsc::Receiver<AgentCommand>,
        speaker_rx: mpsc::Receiver<Vec<u8>>,
        muted: Arc<AtomicBool>,
        arms: Arc<MotionService>,
        sink: Arc<CollectingSink>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = RecordingStore::new(dir.path());
        let rows = vec![
            TimedArmRow {
                timestamp: 0.0,
                pose: ArmPose([0.0; 6]),
            },
            TimedArmRow {
                timestamp: 0.001,
                pose: ArmPose([1.0; 6]),
            },
        ];
        store.save_arm(WAKE_GESTURE, &rows).unwrap();

        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let arms = Arc::new(MotionService::arms(store, sink.clone(), 1000).unwrap());
        let muted = Arc::new(AtomicBool::new(false));
        let (agent_tx, agent_rx) = mpsc::channel(16);
        let (speaker_tx, speaker_rx) = mpsc::channel(16);
        let controller = RobotController::new(agent_tx, speaker_tx, arms.clone(), muted.clone());
        Fixture {
            controller,
            agent_rx,
            speaker_rx,
            muted,
            arms,
            sink,
            _dir: dir,
        }
    }

    fn sent_json(rx: &mut mpsc::Receiver<AgentCommand>) -> Value {
        match rx.try_recv() {
            Ok(AgentCommand::SendText(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected SendText, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hello_starts_listen_mode() {
        let mut fx = fixture();
        fx.controller
            .handle_agent_event(AgentEvent::Text(
                r#"{"type":"hello","session_id":"s1"}"#.to_string(),
            ))
            .await;
        assert_eq!(fx.controller.session_id(), Some("s1"));
        let v = sent_json(&mut fx.agent_rx);
        assert_eq!(v["type"], "listen");
        assert_eq!(v["mode"], "auto");
        assert_eq!(v["session_id"], "");
    }

    #[tokio::test]
    async fn tts_cycle_mutes_then_relistens() {
        let mut fx = fixture();
        fx.controller
            .handle_agent_event(AgentEvent::Text(
                r#"{"type":"tts","state":"start","session_id":"abc"}"#.to_string(),
            ))
            .await;
        assert!(fx.muted.load(Ordering::Relaxed));
        assert_eq!(fx.controller.state(), SystemState::Speaking);

        fx.controller
            .handle_agent_event(AgentEvent::Text(
                r#"{"type":"tts","state":"stop"}"#.to_string(),
            ))
            .await;
        assert!(!fx.muted.load(Ordering::Relaxed));
        assert_eq!(fx.controller.state(), SystemState::Listening);
        let v = sent_json(&mut fx.agent_rx);
        assert_eq!(v["type"], "listen");
        assert_eq!(v["session_id"], "abc");
    }

    #[tokio::test]
    async fn mic_frames_dropped_while_muted() {
        let mut fx = fixture();
        fx.muted.store(true, Ordering::Relaxed);
        fx.controller.handle_mic_frame(vec![1, 2, 3]).await;
        assert!(fx.agent_rx.try_recv().is_err());

        fx.muted.store(false, Ordering::Relaxed);
        fx.controller.handle_mic_frame(vec![4, 5]).await;
        match fx.agent_rx.try_recv() {
            Ok(AgentCommand::SendBinary(data)) => assert_eq!(data, vec![4, 5]),
            other => panic!("expected SendBinary, got {:?}", other),
        }
        assert_eq!(fx.controller.state(), SystemState::Listening);
    }

    #[tokio::test]
    async fn agent_audio_reaches_speaker() {
        let mut fx = fixture();
        fx.controller
            .handle_agent_event(AgentEvent::Binary(vec![9, 9]))
            .await;
        assert_eq!(fx.speaker_rx.try_recv().unwrap(), vec![9, 9]);
        assert_eq!(fx.controller.state(), SystemState::Speaking);
    }

    #[tokio::test]
    async fn connect_plays_wake_gesture() {
        let mut fx = fixture();
        fx.controller.handle_agent_event(AgentEvent::Connected).await;
        assert!(fx.arms.wait_until_idle(Duration::from_secs(2)));
        assert_eq!(fx.sink.0.lock().unwrap().len(), 2);
        fx.arms.stop();
    }

    #[tokio::test]
    async fn disconnect_resets_state_and_mute() {
        let mut fx = fixture();
        fx.muted.store(true, Ordering::Relaxed);
        fx.controller
            .handle_agent_event(AgentEvent::Disconnected)
            .await;
        assert_eq!(fx.controller.state(), SystemState::NetworkError);
        assert!(!fx.muted.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn fall_transition_becomes_status_event() {
        let mut fx = fixture();
        fx.controller
            .handle_agent_event(AgentEvent::Text(
                r#"{"type":"hello","session_id":"s7"}"#.to_string(),
            ))
            .await;
        let _ = fx.agent_rx.try_recv();

        fx.controller
            .handle_pose_event(PoseStatus {
                fallen: true,
                score: 0.9,
                ratio: 0.2,
                timestamp: 123.0,
            })
            .await;
        let v = sent_json(&mut fx.agent_rx);
        assert_eq!(v["type"], "status");
        assert_eq!(v["event"], "PERSON_FALLEN");
        assert_eq!(v["session_id"], "s7");
        let score = v["payload"]["score"].as_f64().unwrap();
        assert!((score - 0.9).abs() < 1e-3);
    }

    #[tokio::test]
    async fn garbage_text_is_ignored() {
        let mut fx = fixture();
        fx.controller
            .handle_agent_event(AgentEvent::Text("not json at all".to_string()))
            .await;
        assert!(fx.agent_rx.try_recv().is_err());
        assert_eq!(fx.controller.state(), SystemState::Idle);
    }
}
