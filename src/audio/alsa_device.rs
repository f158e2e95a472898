//! ALSA PCM open helpers. Everything runs S16LE interleaved; rate and
//! period size are negotiated to the nearest the hardware offers.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// What the hardware actually agreed to.
#[derive(Debug, Clone, Copy)]
pub struct PcmParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames per period (one frame = one sample on every channel)
    pub period_size: usize,
}

pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, PcmParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels)
}

pub fn open_playback(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, PcmParams)> {
    open_pcm(device, Direction::Playback, sample_rate, channels)
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, PcmParams)> {
    let dir_name = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        // Aim for ~20 ms periods so capture latency stays conversational
        hwp.set_period_size_near((sample_rate / 50) as Frames, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        PcmParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}
