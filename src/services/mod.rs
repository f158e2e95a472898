//! Worker-thread services and the mailbox they are driven through.
//!
//! Each service owns one OS thread and a single-slot [`Mailbox`]. The
//! orchestrator posts events; a later event replaces a pending one unless
//! the pending event outranks it. Services never queue work: the robot
//! should act on the latest intent, not replay a backlog.

pub mod cameras;
pub mod motion;
pub mod pose;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

struct Slot<E> {
    pending: Option<(Priority, E)>,
    busy: bool,
}

/// One-deep event slot with priority replacement.
pub struct Mailbox<E> {
    slot: Mutex<Slot<E>>,
    posted: Condvar,
    idle: Condvar,
}

impl<E> Mailbox<E> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                busy: false,
            }),
            posted: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Post an event. Returns false when a pending event of strictly
    /// higher priority keeps the slot and the new event is dropped.
    pub fn post(&self, priority: Priority, event: E) -> bool {
        let mut slot = self.slot.lock().unwrap();
        if let Some((pending, _)) = &slot.pending {
            if *pending > priority {
                return false;
            }
        }
        slot.pending = Some((priority, event));
        self.posted.notify_one();
        true
    }

    /// Worker side: wait up to `timeout` for an event. Taking an event
    /// marks the mailbox busy until [`Mailbox::done`] is called.
    pub fn take(&self, timeout: Duration) -> Option<E> {
        let slot = self.slot.lock().unwrap();
        let (mut slot, _) = self
            .posted
            .wait_timeout_while(slot, timeout, |s| s.pending.is_none())
            .unwrap();
        let (_, event) = slot.pending.take()?;
        slot.busy = true;
        Some(event)
    }

    /// Worker side: mark the taken event handled.
    pub fn done(&self) {
        let mut slot = self.slot.lock().unwrap();
        slot.busy = false;
        self.idle.notify_all();
    }

    pub fn is_idle(&self) -> bool {
        let slot = self.slot.lock().unwrap();
        !slot.busy && slot.pending.is_none()
    }

    /// Block until the worker drains the slot, or `timeout` passes.
    /// Returns true when idle was reached.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let slot = self.slot.lock().unwrap();
        let (slot, _) = self
            .idle
            .wait_timeout_while(slot, timeout, |s| s.busy || s.pending.is_some())
            .unwrap();
        !slot.busy && slot.pending.is_none()
    }
}

impl<E> Default for Mailbox<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A named worker thread with a shared shutdown flag. The loop body gets
/// the flag and must poll it often enough that `stop` returns promptly.
pub struct Worker {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl Worker {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        Ok(Self {
            running,
            handle: Mutex::new(Some(handle)),
            name: name.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("Worker \"{}\" panicked", self.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_take_done_cycle() {
        let mailbox: Mailbox<&str> = Mailbox::new();
        assert!(mailbox.is_idle());
        assert!(mailbox.post(Priority::Normal, "play"));
        assert!(!mailbox.is_idle());
        assert_eq!(mailbox.take(Duration::from_millis(10)), Some("play"));
        assert!(!mailbox.is_idle());
        mailbox.done();
        assert!(mailbox.is_idle());
    }

    #[test]
    fn later_event_replaces_pending() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert!(mailbox.post(Priority::Normal, 1));
        assert!(mailbox.post(Priority::Normal, 2));
        assert_eq!(mailbox.take(Duration::from_millis(10)), Some(2));
    }

    #[test]
    fn high_priority_keeps_slot() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert!(mailbox.post(Priority::High, 1));
        assert!(!mailbox.post(Priority::Normal, 2));
        assert_eq!(mailbox.take(Duration::from_millis(10)), Some(1));
    }

    #[test]
    fn high_replaces_normal() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert!(mailbox.post(Priority::Normal, 1));
        assert!(mailbox.post(Priority::High, 2));
        assert_eq!(mailbox.take(Duration::from_millis(10)), Some(2));
    }

    #[test]
    fn take_times_out_empty() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert_eq!(mailbox.take(Duration::from_millis(5)), None);
    }

    #[test]
    fn wait_until_idle_sees_worker_finish() {
        let mailbox: Arc<Mailbox<u32>> = Arc::new(Mailbox::new());
        mailbox.post(Priority::Normal, 7);
        let worker_box = mailbox.clone();
        let worker = thread::spawn(move || {
            let event = worker_box.take(Duration::from_millis(100));
            assert_eq!(event, Some(7));
            thread::sleep(Duration::from_millis(20));
            worker_box.done();
        });
        assert!(mailbox.wait_until_idle(Duration::from_secs(1)));
        worker.join().unwrap();
    }

    #[test]
    fn wait_until_idle_times_out_when_stuck() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        mailbox.post(Priority::Normal, 1);
        assert!(!mailbox.wait_until_idle(Duration::from_millis(10)));
    }

    #[test]
    fn worker_stops_on_flag() {
        let worker = Worker::spawn("test-worker", |running| {
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
        assert!(worker.is_running());
        worker.stop();
        assert!(!worker.is_running());
    }
}
