mod agent_link;
mod audio;
mod cli;
mod config;
mod controller;
mod fall;
mod mixer;
mod protocol;
mod recordings;
mod robot;
mod services;
mod state;
mod tools;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;

use agent_link::{AgentCommand, AgentEvent, AgentLink, DeviceIdentity};
use audio::AudioSystem;
use cli::{Cli, Command};
use config::Config;
use controller::RobotController;
use fall::FallDetector;
use mixer::SystemAmixer;
use recordings::{RecordingKind, RecordingStore};
use robot::{ActionSink, BaseVelocity, RobotAction, UdpActionSink};
use services::cameras::{self, CameraService};
use services::motion::{self, MotionService};
use services::pose::{PoseWatchService, UdpLandmarkSource};

/// Steps per second for service-driven gesture playback.
const PLAYBACK_FPS: u32 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run => run_robot(config).await,
        Command::SetupAudio { dry_run } => setup_audio(&config, dry_run),
        Command::TestAudio { duration } => test_audio(&config, duration),
        Command::TestCameras { max_index, out } => test_cameras(max_index, &out),
        Command::Recordings => list_recordings(&config),
        Command::Replay { name, kind, fps } => replay(&config, &name, &kind, fps),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run_robot(config: Config) -> Result<()> {
    if !config.agent.enabled {
        bail!("agent.enabled is false; `lekiwi run` needs a voice-agent endpoint");
    }
    log::info!("LeKiwi runtime starting (robot \"{}\")", config.robot.id);

    let sink = Arc::new(UdpActionSink::new(
        &config.robot.action_host,
        config.robot.action_port,
    )?);
    let store = RecordingStore::new(config.recordings.resolve_dir());
    let arms = Arc::new(MotionService::arms(store, sink, PLAYBACK_FPS)?);

    let camera_service = if config.cameras.is_empty() {
        None
    } else {
        Some(CameraService::start(&config.cameras)?)
    };

    let (pose_tx, mut pose_rx) = mpsc::channel(100);
    let pose_service = if config.pose.enabled {
        let source = UdpLandmarkSource::bind(config.pose.listen_port)?;
        let detector = FallDetector::new(
            config.pose.ratio_thresh,
            config.pose.window,
            config.pose.min_conf,
        );
        Some(PoseWatchService::start(
            Box::new(source),
            detector,
            config.pose.frame_skip as u32,
            pose_tx,
        )?)
    } else {
        None
    };

    let muted = Arc::new(AtomicBool::new(false));
    let (mic_tx, mut mic_rx) = mpsc::channel::<Vec<u8>>(100);
    let (speaker_tx, speaker_rx) = mpsc::channel::<Vec<u8>>(100);
    let mut audio_system = AudioSystem::start(&config.audio, mic_tx, speaker_rx, muted.clone())?;

    let (agent_event_tx, mut agent_event_rx) = mpsc::channel::<AgentEvent>(100);
    let (agent_cmd_tx, agent_cmd_rx) = mpsc::channel::<AgentCommand>(100);

    let identity = DeviceIdentity::resolve(&config::data_dir());
    log::info!(
        "Device-Id {}  Client-Id {}",
        identity.device_id,
        identity.client_id
    );
    let tool_server = Arc::new(tools::builtin_server(arms.clone()));
    let link = AgentLink::new(
        config.clone(),
        identity,
        agent_event_tx,
        agent_cmd_rx,
        tool_server,
    );
    tokio::spawn(link.run());

    let mut controller = RobotController::new(agent_cmd_tx, speaker_tx, arms.clone(), muted);

    log::info!("LeKiwi core started");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Ctrl+C received, shutting down");
                break;
            }
            Some(event) = agent_event_rx.recv() => {
                controller.handle_agent_event(event).await;
            }
            Some(frame) = mic_rx.recv() => {
                controller.handle_mic_frame(frame).await;
            }
            Some(status) = pose_rx.recv() => {
                controller.handle_pose_event(status).await;
            }
        }
    }

    // Dropping the controller closes the link command channel and the
    // speaker queue; the link task and playback thread exit on their own.
    drop(controller);
    arms.halt();
    audio_system.stop();
    if let Some(service) = &pose_service {
        service.stop();
    }
    if let Some(service) = &camera_service {
        service.stop();
    }
    arms.stop();
    log::info!("LeKiwi stopped");
    Ok(())
}

fn setup_audio(config: &Config, dry_run: bool) -> Result<()> {
    if dry_run {
        for line in mixer::render_dry_run(config.mixer.card) {
            println!("{}", line);
        }
        return Ok(());
    }

    let amixer = SystemAmixer;
    let registers = mixer::apply_codec_setup(&amixer, config.mixer.card)
        .and_then(|()| mixer::verify_codec_setup(&amixer, config.mixer.card));

    // Install the asoundrc even when register writes failed; the exit code
    // still reports the failure afterwards.
    let home = dirs::home_dir().context("No home directory")?;
    let installed = mixer::install_asoundrc(&config.mixer.asoundrc_source, &home)?;

    registers?;
    if installed {
        println!(
            "Codec on card {} configured and verified, ~/.asoundrc installed",
            config.mixer.card
        );
    } else {
        println!("Codec on card {} configured and verified", config.mixer.card);
    }
    Ok(())
}

fn test_audio(config: &Config, duration: f32) -> Result<()> {
    let s = &config.audio;
    audio::tone::speaker_test(&s.playback_device, s.sample_rate, s.channels, duration)?;
    audio::tone::mic_loopback(
        &s.capture_device,
        &s.playback_device,
        s.sample_rate,
        s.channels,
        duration,
    )?;
    println!("Audio test complete");
    Ok(())
}

fn test_cameras(max_index: i32, out: &Path) -> Result<()> {
    let found = cameras::probe_cameras(max_index, out)?;
    println!(
        "{} camera(s) found at indices {:?}; stills saved to {}",
        found.len(),
        found,
        out.display()
    );
    Ok(())
}

fn list_recordings(config: &Config) -> Result<()> {
    let store = RecordingStore::new(config.recordings.resolve_dir());
    let all = store.list_all();
    if all.is_empty() {
        println!("No recordings found.");
        return Ok(());
    }
    for (kind, name) in all {
        println!("{:<6}  {}", kind, name);
    }
    Ok(())
}

fn replay(config: &Config, name: &str, kind: &str, fps: u32) -> Result<()> {
    let kind: RecordingKind = kind.parse()?;
    let store = RecordingStore::new(config.recordings.resolve_dir());
    let actions = motion::load_actions(&store, kind, name)?;
    let sink = UdpActionSink::new(&config.robot.action_host, config.robot.action_port)?;

    println!("Replaying \"{}\": {} steps at {} fps", name, actions.len(), fps);
    let sent = motion::play_actions(&actions, fps, &sink, || false);
    if kind == RecordingKind::Wheels {
        sink.send(&RobotAction::base_step(BaseVelocity::ZERO))?;
    }
    println!("Sent {} of {} steps", sent, actions.len());
    Ok(())
}
