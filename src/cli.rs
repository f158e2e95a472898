//! Command line surface.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lekiwi", version, about = "LeKiwi companion robot runtime")]
pub struct Cli {
    /// Config file path (default: <config_dir>/lekiwi/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the resident runtime
    Run,
    /// Program the sound codec registers and install ~/.asoundrc
    SetupAudio {
        /// Print the amixer commands instead of executing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Speaker tone, then microphone loopback
    TestAudio {
        /// Seconds per stage
        #[arg(long, default_value_t = 3.0)]
        duration: f32,
    },
    /// Probe video devices and save a still from each working camera
    TestCameras {
        /// Highest device index to try
        #[arg(long, default_value_t = 10)]
        max_index: i32,
        /// Directory for the probe stills
        #[arg(long, default_value = "camera_probe")]
        out: PathBuf,
    },
    /// List stored motion recordings
    Recordings,
    /// Play one recording straight to the action sink
    Replay {
        /// Recording name
        #[arg(long)]
        name: String,
        /// Recording kind
        #[arg(long = "type", value_parser = ["arm", "wheels"], default_value = "arm")]
        kind: String,
        /// Steps per second
        #[arg(long, default_value_t = 30)]
        fps: u32,
    },
}
