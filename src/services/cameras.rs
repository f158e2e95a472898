//! Camera capture service.
//!
//! Each configured camera runs its own thread that keeps the latest JPEG
//! in a per-label slot, so `get_image` never waits on the hardware. A
//! camera that fails to open is skipped; the rest carry on.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use opencv::core::{self, Mat, Vector};
use opencv::imgcodecs::{self, IMWRITE_JPEG_QUALITY};
use opencv::prelude::*;
use opencv::videoio::{
    self, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH, VideoCapture,
};

use super::Worker;
use crate::config::CameraConfig;

type FrameSlots = BTreeMap<String, Mutex<Option<Vec<u8>>>>;

pub struct CameraService {
    frames: Arc<FrameSlots>,
    workers: Vec<Worker>,
}

impl CameraService {
    /// Open every configured camera and start its capture thread.
    /// Cameras that cannot be opened are logged and left out.
    pub fn start(cameras: &BTreeMap<String, CameraConfig>) -> Result<Self> {
        let mut slots = FrameSlots::new();
        let mut opened = Vec::new();

        for (label, config) in cameras {
            match open_camera(config) {
                Ok(cap) => {
                    slots.insert(label.clone(), Mutex::new(None));
                    opened.push((label.clone(), config.clone(), cap));
                    log::info!(
                        "Started camera \"{}\" (device {}, {}x{})",
                        label,
                        config.device_id,
                        config.width,
                        config.height
                    );
                }
                Err(e) => log::error!(
                    "Failed to open camera \"{}\" (device {}): {:#}",
                    label,
                    config.device_id,
                    e
                ),
            }
        }

        let frames = Arc::new(slots);
        let mut workers = Vec::with_capacity(opened.len());
        for (label, config, cap) in opened {
            let frames = frames.clone();
            let thread_name = format!("camera-{}", label);
            workers.push(Worker::spawn(&thread_name, move |running| {
                capture_loop(cap, &label, &config, &frames, &running);
            })?);
        }

        log::info!("Camera service started with {} camera(s)", workers.len());
        Ok(Self { frames, workers })
    }

    /// Latest JPEG from one camera, or None before the first frame lands
    /// or for an unknown label.
    pub fn get_image(&self, label: &str) -> Option<Vec<u8>> {
        match self.frames.get(label) {
            Some(slot) => slot.lock().unwrap().clone(),
            None => {
                log::warn!("Camera \"{}\" not found", label);
                None
            }
        }
    }

    pub fn get_all_images(&self) -> BTreeMap<String, Option<Vec<u8>>> {
        self.frames
            .keys()
            .map(|label| (label.clone(), self.get_image(label)))
            .collect()
    }

    /// Labels of the cameras that actually opened.
    pub fn labels(&self) -> Vec<String> {
        self.frames.keys().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.workers.iter().any(Worker::is_running)
    }

    pub fn stop(&self) {
        for worker in &self.workers {
            worker.stop();
        }
        log::info!("Camera service stopped");
    }
}

impl Drop for CameraService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_camera(config: &CameraConfig) -> Result<VideoCapture> {
    let mut cap = VideoCapture::new(config.device_id, videoio::CAP_ANY)
        .context("VideoCapture constructor failed")?;
    if !cap.is_opened().context("is_opened query failed")? {
        bail!("device not available");
    }
    cap.set(CAP_PROP_FRAME_WIDTH, config.width as f64)
        .context("Failed to set width")?;
    cap.set(CAP_PROP_FRAME_HEIGHT, config.height as f64)
        .context("Failed to set height")?;
    cap.set(CAP_PROP_FPS, config.fps as f64)
        .context("Failed to set FPS")?;
    Ok(cap)
}

fn capture_loop(
    mut cap: VideoCapture,
    label: &str,
    config: &CameraConfig,
    frames: &FrameSlots,
    running: &AtomicBool,
) {
    let params = Vector::from_slice(&[IMWRITE_JPEG_QUALITY, config.jpeg_quality]);
    let mut frame = Mat::default();
    let mut rotated = Mat::default();

    while running.load(Ordering::Relaxed) {
        match cap.read(&mut frame) {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("Failed to read frame from camera \"{}\"", label);
                // A dead camera returns immediately; do not spin
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
            Err(e) => {
                log::warn!("Camera \"{}\" read error: {}", label, e);
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        }

        // Cameras are mounted upside down on the chassis
        let encoded = if config.rotate_180 {
            core::rotate(&frame, &mut rotated, core::ROTATE_180).and_then(|_| {
                let mut buf = Vector::new();
                imgcodecs::imencode(".jpg", &rotated, &mut buf, &params).map(|ok| (ok, buf))
            })
        } else {
            let mut buf = Vector::new();
            imgcodecs::imencode(".jpg", &frame, &mut buf, &params).map(|ok| (ok, buf))
        };

        match encoded {
            Ok((true, buf)) => {
                if let Some(slot) = frames.get(label) {
                    *slot.lock().unwrap() = Some(buf.to_vec());
                }
            }
            Ok((false, _)) => log::warn!("Failed to encode frame from camera \"{}\"", label),
            Err(e) => log::warn!("Camera \"{}\" encode error: {}", label, e),
        }
    }

    let _ = cap.release();
    log::info!("Released camera \"{}\"", label);
}

/// Scan device indices, grab one warmed-up frame from each camera that
/// opens, and write it to `out_dir` as `camera<N>.png`. Returns the
/// indices that produced a frame.
pub fn probe_cameras(max_index: i32, out_dir: &Path) -> Result<Vec<i32>> {
    let mut found = Vec::new();
    for index in 0..max_index {
        let mut cap = match VideoCapture::new(index, videoio::CAP_ANY) {
            Ok(cap) => cap,
            Err(_) => continue,
        };
        if !cap.is_opened().unwrap_or(false) {
            continue;
        }
        log::info!("Capturing from camera {}...", index);

        // Warm up before the real grab; early frames are often dark
        let mut frame = Mat::default();
        for _ in 0..5 {
            let _ = cap.read(&mut frame);
        }
        let got = cap.read(&mut frame).unwrap_or(false);
        let _ = cap.release();
        if !got {
            log::warn!("Camera {}: failed to capture", index);
            continue;
        }

        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;
        let path = out_dir.join(format!("camera{}.png", found.len() + 1));
        let path_str = path.to_string_lossy();
        let ok = imgcodecs::imwrite(&path_str, &frame, &Vector::new())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !ok {
            bail!("Image encoder refused {}", path.display());
        }
        log::info!("Camera {}: saved {}", index, path.display());
        found.push(index);
    }

    if found.is_empty() {
        bail!("No cameras found");
    }
    Ok(found)
}
