//! Full-duplex audio pump between ALSA and the agent link.
//!
//! Real-time I/O runs on dedicated OS threads, not tokio tasks; the async
//! side talks to them over mpsc channels. The capture thread encodes Opus
//! frames and `blocking_send`s them out; the playback thread
//! `blocking_recv`s packets and writes decoded PCM to the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device;
use super::codec::{Decoder, Encoder};
use crate::config::AudioSettings;

pub struct AudioSystem {
    running: Arc<AtomicBool>,
    record_handle: Option<JoinHandle<()>>,
    play_handle: Option<JoinHandle<()>>,
}

impl AudioSystem {
    /// Start both threads. `muted` is shared with the controller: while it
    /// is set (agent TTS playing), captured frames are dropped at the
    /// source so the mic does not feed the speaker back to the agent.
    pub fn start(
        settings: &AudioSettings,
        opus_tx: mpsc::Sender<Vec<u8>>,
        opus_rx: mpsc::Receiver<Vec<u8>>,
        muted: Arc<AtomicBool>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));

        log::info!(
            "Audio starting: capture=\"{}\", playback=\"{}\", {} Hz, {} ch, {} ms frames",
            settings.capture_device,
            settings.playback_device,
            settings.sample_rate,
            settings.channels,
            settings.frame_ms,
        );

        let record_handle = {
            let running = running.clone();
            let settings = settings.clone();
            thread::Builder::new().name("audio-record".into()).spawn(move || {
                if let Err(e) = record_thread(&settings, opus_tx, &running, &muted) {
                    log::error!("Recording thread error: {}", e);
                }
            })?
        };

        let play_handle = {
            let running = running.clone();
            let settings = settings.clone();
            thread::Builder::new().name("audio-play".into()).spawn(move || {
                // Let the capture device settle before opening playback
                thread::sleep(std::time::Duration::from_secs(1));
                if let Err(e) = play_thread(&settings, opus_rx, &running) {
                    log::error!("Playback thread error: {}", e);
                }
            })?
        };

        Ok(Self {
            running,
            record_handle: Some(record_handle),
            play_handle: Some(play_handle),
        })
    }

    /// Signal threads to stop and join the capture side. The playback
    /// thread exits when its packet channel closes, so it is detached.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.record_handle.take() {
            let _ = h.join();
        }
        self.play_handle.take();
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_thread(
    settings: &AudioSettings,
    opus_tx: mpsc::Sender<Vec<u8>>,
    running: &AtomicBool,
    muted: &AtomicBool,
) -> Result<()> {
    let (pcm, params) = alsa_device::open_capture(
        &settings.capture_device,
        settings.sample_rate,
        settings.channels,
    )?;

    let mut encoder = Encoder::new(
        params.sample_rate,
        params.channels,
        settings.frame_ms,
        settings.bitrate,
    )?;
    let frame_samples = encoder.input_frame_samples();

    let mut read_buf = vec![0i16; params.period_size * params.channels as usize];
    let mut accum: Vec<i16> = Vec::with_capacity(frame_samples * 2);

    let io = pcm.io_i16()?;

    log::info!(
        "Recording started: rate={}, ch={}, period={}, frame_samples={}",
        params.sample_rate,
        params.channels,
        params.period_size,
        frame_samples,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                if muted.load(Ordering::Relaxed) {
                    // Keep the device hot but forget anything captured
                    accum.clear();
                    continue;
                }
                accum.extend_from_slice(&read_buf[..frames * params.channels as usize]);
                while accum.len() >= frame_samples {
                    match encoder.encode(&accum[..frame_samples]) {
                        Ok(packet) => {
                            if !packet.is_empty() && opus_tx.blocking_send(packet).is_err() {
                                log::warn!("Opus receiver dropped, stopping capture");
                                return Ok(());
                            }
                        }
                        Err(e) => log::error!("Opus encode error: {}", e),
                    }
                    accum.drain(..frame_samples);
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Recording stopped");
    Ok(())
}

fn play_thread(
    settings: &AudioSettings,
    mut opus_rx: mpsc::Receiver<Vec<u8>>,
    running: &AtomicBool,
) -> Result<()> {
    let (pcm, params) = alsa_device::open_playback(
        &settings.playback_device,
        settings.sample_rate,
        settings.channels,
    )?;

    let mut decoder = Decoder::new(params.sample_rate, params.channels)?;
    let io = pcm.io_i16()?;

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    while running.load(Ordering::Relaxed) {
        let Some(packet) = opus_rx.blocking_recv() else {
            log::info!("Playback channel closed");
            break;
        };
        let pcm_data = match decoder.decode(&packet) {
            Ok(data) if !data.is_empty() => data,
            Ok(_) => continue,
            Err(e) => {
                log::error!("Opus decode error: {}", e);
                continue;
            }
        };

        // Write with XRUN recovery; give up on the packet after repeated
        // failures rather than spinning.
        let channels = params.channels as usize;
        let total_frames = pcm_data.len() / channels;
        let mut written = 0;
        let mut retries = 0u32;
        while written < total_frames {
            match io.writei(&pcm_data[written * channels..]) {
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break;
                    }
                    retries += 1;
                    if retries >= 3 {
                        log::error!(
                            "Dropping {} unwritten frames after {} recoveries",
                            total_frames - written,
                            retries
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}
