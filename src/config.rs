//! Runtime configuration, loaded from a TOML file with sane defaults for a
//! stock LeKiwi build (WM8960 HAT on card 2, 16 kHz voice link, host process
//! on localhost).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const APP_DIR: &str = "lekiwi";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub robot: RobotConfig,
    pub audio: AudioSettings,
    pub mixer: MixerConfig,
    pub agent: AgentConfig,
    pub recordings: RecordingsConfig,
    /// Camera label → capture settings, e.g. `[cameras.front]`.
    pub cameras: BTreeMap<String, CameraConfig>,
    pub pose: PoseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    pub id: String,
    /// Where the host process listens for action datagrams.
    pub action_host: String,
    pub action_port: u16,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            id: "biden_kiwi".to_string(),
            action_host: "127.0.0.1".to_string(),
            action_port: 5555,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioSettings {
    /// ALSA capture device name (e.g. "default", "plughw:2,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// Opus frame duration in ms
    pub frame_ms: u32,
    /// Opus bitrate in bits/s
    pub bitrate: i32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            sample_rate: 16000,
            channels: 2,
            frame_ms: 60,
            bitrate: 24000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MixerConfig {
    /// ALSA card index of the codec
    pub card: u32,
    /// The `.asoundrc` shipped with the repo, installed to `~/.asoundrc`
    pub asoundrc_source: PathBuf,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            card: 2,
            asoundrc_source: PathBuf::from("assets/asoundrc"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub enabled: bool,
    /// WebSocket URL of the voice-agent server
    pub url: String,
    /// Bearer token sent on connect
    pub token: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordingsConfig {
    /// Recordings root; `<data_local_dir>/lekiwi/recordings` when unset.
    pub dir: Option<PathBuf>,
}

impl RecordingsConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        match &self.dir {
            Some(d) => d.clone(),
            None => data_dir().join("recordings"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_id: i32,
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    pub jpeg_quality: i32,
    /// The cameras are mounted upside down on the stock chassis.
    pub rotate_180: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            width: 640,
            height: 480,
            fps: 30,
            jpeg_quality: 85,
            rotate_180: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoseConfig {
    pub enabled: bool,
    /// UDP port the external pose estimator sends landmark frames to
    pub listen_port: u16,
    pub ratio_thresh: f32,
    pub window: usize,
    pub min_conf: f32,
    pub frame_skip: usize,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_port: 5560,
            ratio_thresh: 0.8,
            window: 12,
            min_conf: 0.5,
            frame_skip: 1,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default path is tried
    /// and a missing file falls back to `Config::default()`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Failed to parse config file {}", p.display()))?
            }
            None => {
                let p = default_config_path();
                if p.exists() {
                    let text = std::fs::read_to_string(&p)
                        .with_context(|| format!("Failed to read config file {}", p.display()))?;
                    Self::from_toml(&text)
                        .with_context(|| format!("Failed to parse config file {}", p.display()))?
                } else {
                    log::debug!("No config file at {}, using defaults", p.display());
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.robot.id.is_empty() {
            bail!("robot.id must not be empty");
        }
        if self.audio.sample_rate == 0 {
            bail!("audio.sample_rate must be nonzero");
        }
        if self.audio.channels == 0 {
            bail!("audio.channels must be nonzero");
        }
        if !matches!(self.audio.frame_ms, 10 | 20 | 40 | 60) {
            bail!("audio.frame_ms must be one of 10, 20, 40, 60");
        }
        for (label, cam) in &self.cameras {
            if cam.fps <= 0 {
                bail!("cameras.{}.fps must be positive", label);
            }
            if cam.width <= 0 || cam.height <= 0 {
                bail!("cameras.{}.width/height must be positive", label);
            }
        }
        if self.agent.enabled && self.agent.url.is_empty() {
            bail!("agent.url must be set when agent.enabled is true");
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

/// Per-app data directory (recordings, persisted client id).
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.robot.id, "biden_kiwi");
        assert_eq!(config.mixer.card, 2);
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(config.cameras.is_empty());
    }

    #[test]
    fn parses_partial_toml() {
        let config = Config::from_toml(
            r#"
            [robot]
            id = "my_kiwi"

            [cameras.front]
            device_id = 0

            [cameras.wrist]
            device_id = 2
            rotate_180 = false
            "#,
        )
        .unwrap();
        assert_eq!(config.robot.id, "my_kiwi");
        assert_eq!(config.robot.action_port, 5555);
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras["front"].width, 640);
        assert!(config.cameras["front"].rotate_180);
        assert!(!config.cameras["wrist"].rotate_180);
    }

    #[test]
    fn rejects_bad_frame_duration() {
        let config = Config::from_toml("[audio]\nframe_ms = 25\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_robot_id() {
        let config = Config::from_toml("[robot]\nid = \"\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_agent_enabled_without_url() {
        let config = Config::from_toml("[agent]\nenabled = true\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_path_must_exist() {
        assert!(Config::load(Some(Path::new("/nonexistent/lekiwi.toml"))).is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[mixer]\ncard = 3\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.mixer.card, 3);
    }

    #[test]
    fn recordings_dir_override() {
        let config = Config::from_toml("[recordings]\ndir = \"/tmp/rec\"\n").unwrap();
        assert_eq!(config.recordings.resolve_dir(), PathBuf::from("/tmp/rec"));
    }
}
