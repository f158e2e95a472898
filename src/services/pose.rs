//! Person-watch service.
//!
//! Pose estimation runs out of process; an estimator pushes landmark
//! frames as JSON datagrams to a local UDP port. This service feeds them
//! through the [`FallDetector`] and reports only the transitions, so the
//! orchestrator hears "person fallen" once, not thirty times a second.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::Worker;
use crate::fall::{FallDetector, Landmark};

/// One frame from the estimator. `landmarks` may be empty when nobody is
/// in view; `timestamp` defaults to the receive time when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct PoseFrame {
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    #[serde(default = "unix_now")]
    pub timestamp: f64,
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Reported on every fall-state flip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseStatus {
    pub fallen: bool,
    pub score: f32,
    pub ratio: f32,
    pub timestamp: f64,
}

impl PoseStatus {
    pub fn event_type(&self) -> &'static str {
        if self.fallen {
            "PERSON_FALLEN"
        } else {
            "PERSON_STABLE"
        }
    }
}

/// Blocking landmark feed. `next_frame` returns `None` when nothing
/// arrived this tick; the worker polls its shutdown flag in between.
pub trait LandmarkSource: Send {
    fn next_frame(&mut self) -> Option<PoseFrame>;
}

pub struct UdpLandmarkSource {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl UdpLandmarkSource {
    pub fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .with_context(|| format!("Failed to bind pose port {}", port))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .context("Failed to set pose socket timeout")?;
        log::info!("Listening for pose landmarks on udp/{}", port);
        Ok(Self {
            socket,
            buf: vec![0u8; 64 * 1024],
        })
    }
}

impl LandmarkSource for UdpLandmarkSource {
    fn next_frame(&mut self) -> Option<PoseFrame> {
        let (len, _) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                return None;
            }
            Err(e) => {
                log::warn!("Pose socket error: {}", e);
                return None;
            }
        };
        match serde_json::from_slice::<PoseFrame>(&self.buf[..len]) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::warn!("Bad pose datagram ({} bytes): {}", len, e);
                None
            }
        }
    }
}

pub struct PoseWatchService {
    worker: Worker,
}

impl PoseWatchService {
    pub fn start(
        source: Box<dyn LandmarkSource>,
        detector: FallDetector,
        frame_skip: u32,
        status_tx: mpsc::Sender<PoseStatus>,
    ) -> Result<Self> {
        let worker = Worker::spawn("pose-watch", move |running| {
            watch_loop(source, detector, frame_skip, status_tx, &running);
        })?;
        log::info!("Pose watch service started");
        Ok(Self { worker })
    }

    pub fn stop(&self) {
        self.worker.stop();
        log::info!("Pose watch service stopped");
    }
}

fn watch_loop(
    mut source: Box<dyn LandmarkSource>,
    mut detector: FallDetector,
    frame_skip: u32,
    status_tx: mpsc::Sender<PoseStatus>,
    running: &AtomicBool,
) {
    let mut frame_idx: u64 = 0;
    let mut prev_fallen = false;

    while running.load(Ordering::Relaxed) {
        let Some(frame) = source.next_frame() else {
            continue;
        };
        let process_this = frame_idx % (frame_skip as u64 + 1) == 0;
        frame_idx += 1;
        if !process_this {
            continue;
        }
        if frame.landmarks.is_empty() {
            // Nobody in view; drop the latch so the next fall is reported
            prev_fallen = false;
            continue;
        }
        match detector.detect(&frame.landmarks, frame.timestamp) {
            Some(event) => {
                if event.is_fall != prev_fallen {
                    let status = PoseStatus {
                        fallen: event.is_fall,
                        score: event.score,
                        ratio: event.ratio,
                        timestamp: event.timestamp,
                    };
                    if status.fallen {
                        log::warn!(
                            "Person fallen (score {:.2}, ratio {:.2})",
                            status.score,
                            status.ratio
                        );
                    } else {
                        log::info!("Person stable again (score {:.2})", status.score);
                    }
                    if status_tx.blocking_send(status).is_err() {
                        log::warn!("Status receiver dropped, stopping pose watch");
                        return;
                    }
                }
                prev_fallen = event.is_fall;
            }
            None => prev_fallen = false,
        }
    }
}
