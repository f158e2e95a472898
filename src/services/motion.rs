//! Arm and wheel playback services.
//!
//! Each service replays recorded trajectories through an [`ActionSink`] on
//! its own thread. A `Play` posted mid-playback switches to the new
//! recording at the next step; `Stop` outranks it and aborts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use super::{Mailbox, Priority, Worker};
use crate::recordings::{RecordingKind, RecordingStore};
use crate::robot::{ActionSink, BaseVelocity, RobotAction};

const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionCommand {
    Play(String),
    Stop,
}

pub struct MotionService {
    kind: RecordingKind,
    store: RecordingStore,
    mailbox: Arc<Mailbox<MotionCommand>>,
    worker: Worker,
}

impl MotionService {
    pub fn arms(store: RecordingStore, sink: Arc<dyn ActionSink>, fps: u32) -> Result<Self> {
        Self::start(RecordingKind::Arm, store, sink, fps)
    }

    pub fn wheels(store: RecordingStore, sink: Arc<dyn ActionSink>, fps: u32) -> Result<Self> {
        Self::start(RecordingKind::Wheels, store, sink, fps)
    }

    fn start(
        kind: RecordingKind,
        store: RecordingStore,
        sink: Arc<dyn ActionSink>,
        fps: u32,
    ) -> Result<Self> {
        let mailbox = Arc::new(Mailbox::new());
        let thread_name = match kind {
            RecordingKind::Arm => "arms-service",
            RecordingKind::Wheels => "wheels-service",
        };
        let worker = Worker::spawn(thread_name, {
            let mailbox = mailbox.clone();
            let store = store.clone();
            move |running| service_loop(kind, &store, sink.as_ref(), fps, &mailbox, &running)
        })?;
        log::info!("{} service started", kind);
        Ok(Self {
            kind,
            store,
            mailbox,
            worker,
        })
    }

    /// Queue a recording by name. The worker resolves it; an unknown name
    /// is logged there, not here.
    pub fn play(&self, name: &str) -> bool {
        self.mailbox
            .post(Priority::Normal, MotionCommand::Play(name.to_string()))
    }

    /// Abort whatever is playing. Outranks queued `Play` events.
    pub fn halt(&self) -> bool {
        self.mailbox.post(Priority::High, MotionCommand::Stop)
    }

    pub fn available_recordings(&self) -> Vec<String> {
        self.store.list(self.kind)
    }

    pub fn is_idle(&self) -> bool {
        self.mailbox.is_idle()
    }

    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.mailbox.wait_until_idle(timeout)
    }

    pub fn stop(&self) {
        self.worker.stop();
        log::info!("{} service stopped", self.kind);
    }
}

/// Load a recording as a step sequence ready for the sink. Arm rows carry
/// a zero base velocity; wheel rows leave the arm untouched.
pub fn load_actions(
    store: &RecordingStore,
    kind: RecordingKind,
    name: &str,
) -> Result<Vec<RobotAction>> {
    let actions = match kind {
        RecordingKind::Arm => store
            .load_arm(name)?
            .into_iter()
            .map(|row| RobotAction::arm_step(row.pose))
            .collect(),
        RecordingKind::Wheels => store
            .load_wheels(name)?
            .into_iter()
            .map(|row| RobotAction::base_step(row.velocity))
            .collect(),
    };
    Ok(actions)
}

/// Send `actions` at `fps`, compensating the sleep for send time.
/// `check_abort` runs before every step; returning true stops the replay.
pub fn play_actions(
    actions: &[RobotAction],
    fps: u32,
    sink: &dyn ActionSink,
    mut check_abort: impl FnMut() -> bool,
) -> usize {
    let step = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
    let mut sent = 0;
    for action in actions {
        if check_abort() {
            break;
        }
        let t0 = Instant::now();
        if let Err(e) = sink.send(action) {
            log::warn!("Action send failed: {}", e);
        }
        sent += 1;
        let elapsed = t0.elapsed();
        if step > elapsed {
            std::thread::sleep(step - elapsed);
        }
    }
    sent
}

fn service_loop(
    kind: RecordingKind,
    store: &RecordingStore,
    sink: &dyn ActionSink,
    fps: u32,
    mailbox: &Mailbox<MotionCommand>,
    running: &AtomicBool,
) {
    let mut next: Option<MotionCommand> = None;
    while running.load(Ordering::Relaxed) {
        let command = match next.take() {
            Some(command) => command,
            None => match mailbox.take(IDLE_POLL) {
                Some(command) => command,
                None => continue,
            },
        };
        match command {
            MotionCommand::Stop => {}
            MotionCommand::Play(name) => match load_actions(store, kind, &name) {
                Ok(actions) => {
                    log::info!(
                        "Playing {} recording \"{}\": {} steps at {} fps",
                        kind,
                        name,
                        actions.len(),
                        fps
                    );
                    let sent = play_actions(actions.as_slice(), fps, sink, || {
                        if !running.load(Ordering::Relaxed) {
                            return true;
                        }
                        match mailbox.take(Duration::ZERO) {
                            Some(MotionCommand::Stop) => {
                                log::info!("Playback of \"{}\" interrupted", name);
                                true
                            }
                            Some(replacement) => {
                                next = Some(replacement);
                                true
                            }
                            None => false,
                        }
                    });
                    if kind == RecordingKind::Wheels {
                        // Never leave the base coasting at the last velocity
                        if let Err(e) = sink.send(&RobotAction::base_step(BaseVelocity::ZERO)) {
                            log::warn!("Zero-velocity send failed: {}", e);
                        }
                    }
                    if sent == actions.len() {
                        log::info!("Finished \"{}\"", name);
                    }
                }
                Err(e) => log::warn!("Cannot play \"{}\": {:#}", name, e),
            },
        }
        if next.is_none() {
            mailbox.done();
        }
    }
    mailbox.done();
}
