//! Speaker and microphone smoke tests.
//!
//! Plays an A4 sine tone, then records from the mic and plays the capture
//! back, so a headless box can be checked with nothing but ears.

use std::time::Duration;

use alsa::pcm::PCM;
use anyhow::{Context, Result};

use super::alsa_device::{self, PcmParams};

const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.3;

/// Interleaved i16 sine frames, the same samples on every channel.
pub fn sine_frames(
    freq_hz: f32,
    seconds: f32,
    sample_rate: u32,
    channels: u32,
    amplitude: f32,
) -> Vec<i16> {
    let total = (seconds * sample_rate as f32) as usize;
    let mut out = Vec::with_capacity(total * channels as usize);
    for n in 0..total {
        let t = n as f32 / sample_rate as f32;
        let v = amplitude * (2.0 * std::f32::consts::PI * freq_hz * t).sin();
        let s = (v * i16::MAX as f32) as i16;
        for _ in 0..channels {
            out.push(s);
        }
    }
    out
}

/// Play a test tone on `device`.
pub fn speaker_test(device: &str, sample_rate: u32, channels: u32, seconds: f32) -> Result<()> {
    let (pcm, params) = alsa_device::open_playback(device, sample_rate, channels)?;
    let frames = sine_frames(
        TONE_HZ,
        seconds,
        params.sample_rate,
        params.channels,
        TONE_AMPLITUDE,
    );
    log::info!("Playing {} Hz test tone for {:.1} s", TONE_HZ, seconds);
    write_all(&pcm, &params, &frames)?;
    pcm.drain().context("Failed to drain playback")?;
    Ok(())
}

/// Record `seconds` from the mic, then play the capture back.
pub fn mic_loopback(
    capture_device: &str,
    playback_device: &str,
    sample_rate: u32,
    channels: u32,
    seconds: f32,
) -> Result<()> {
    let recording = {
        let (pcm, params) = alsa_device::open_capture(capture_device, sample_rate, channels)?;
        let io = pcm.io_i16()?;
        let want = (seconds * params.sample_rate as f32) as usize;
        let mut buf = vec![0i16; params.period_size * params.channels as usize];
        let mut recorded: Vec<i16> = Vec::with_capacity(want * params.channels as usize);

        log::info!("Recording from microphone for {:.1} s", seconds);
        while recorded.len() < want * params.channels as usize {
            match io.readi(&mut buf) {
                Ok(n) => recorded.extend_from_slice(&buf[..n * params.channels as usize]),
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    pcm.prepare().context("Failed to recover PCM capture")?;
                }
            }
        }
        (recorded, params.channels)
    };

    // Reopen for playback once the capture handle is closed; a shared
    // codec often refuses a second stream while the first is open.
    std::thread::sleep(Duration::from_millis(200));

    let (pcm, params) = alsa_device::open_playback(playback_device, sample_rate, recording.1)?;
    log::info!("Playing back recorded audio");
    write_all(&pcm, &params, &recording.0)?;
    pcm.drain().context("Failed to drain playback")?;
    Ok(())
}

fn write_all(pcm: &PCM, params: &PcmParams, frames: &[i16]) -> Result<()> {
    let io = pcm.io_i16()?;
    let channels = params.channels as usize;
    let total_frames = frames.len() / channels;
    let mut written = 0;
    while written < total_frames {
        match io.writei(&frames[written * channels..]) {
            Ok(n) => written += n,
            Err(e) => {
                log::warn!("ALSA playback error: {}, recovering...", e);
                pcm.prepare().context("Failed to recover PCM playback")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_has_requested_length() {
        let frames = sine_frames(440.0, 3.0, 16000, 2, 0.3);
        assert_eq!(frames.len(), 16000 * 3 * 2);
    }

    #[test]
    fn sine_duplicates_channels() {
        let frames = sine_frames(440.0, 0.01, 16000, 2, 0.3);
        for pair in frames.chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn sine_respects_amplitude() {
        let frames = sine_frames(440.0, 0.5, 16000, 1, 0.3);
        let limit = (0.3 * i16::MAX as f32) as i16;
        assert!(frames.iter().all(|&s| s.abs() <= limit));
        // A half-second of 440 Hz has to actually swing
        assert!(frames.iter().any(|&s| s > limit / 2));
    }

    #[test]
    fn sine_starts_at_zero() {
        let frames = sine_frames(440.0, 0.1, 16000, 1, 0.3);
        assert_eq!(frames[0], 0);
    }
}
