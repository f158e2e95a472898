//! Fall detection from body pose landmarks.
//!
//! Works on the standard 33-point pose topology: a person is considered
//! fallen when the torso (shoulder midpoint to hip midpoint) lies closer to
//! horizontal than vertical, smoothed over a sliding vote window.

use std::collections::VecDeque;

use serde::Deserialize;

/// Landmark indices of interest in the pose topology.
const LEFT_SHOULDER: usize = 11;
const RIGHT_SHOULDER: usize = 12;
const LEFT_HIP: usize = 23;
const RIGHT_HIP: usize = 24;

/// One normalized pose landmark. Extra fields on the wire (z, name) are ignored.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub visibility: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallEvent {
    pub is_fall: bool,
    /// Fraction of fall votes in the current window
    pub score: f32,
    /// Torso vertical/horizontal extent ratio for this frame
    pub ratio: f32,
    pub timestamp: f64,
}

pub struct FallDetector {
    ratio_thresh: f32,
    window: VecDeque<bool>,
    window_len: usize,
    min_conf: f32,
}

impl FallDetector {
    pub fn new(ratio_thresh: f32, window_len: usize, min_conf: f32) -> Self {
        Self {
            ratio_thresh,
            window: VecDeque::with_capacity(window_len),
            window_len: window_len.max(1),
            min_conf,
        }
    }

    fn torso_ratio(landmarks: &[Landmark]) -> f32 {
        let shx = (landmarks[LEFT_SHOULDER].x + landmarks[RIGHT_SHOULDER].x) * 0.5;
        let shy = (landmarks[LEFT_SHOULDER].y + landmarks[RIGHT_SHOULDER].y) * 0.5;
        let hpx = (landmarks[LEFT_HIP].x + landmarks[RIGHT_HIP].x) * 0.5;
        let hpy = (landmarks[LEFT_HIP].y + landmarks[RIGHT_HIP].y) * 0.5;
        let vert = (shy - hpy).abs();
        let horiz = (shx - hpx).abs();
        vert / (horiz + 1e-4)
    }

    fn push_vote(&mut self, vote: bool) {
        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(vote);
    }

    /// Feed one frame of landmarks. Returns `None` when the torso landmarks
    /// are missing or below the visibility floor (which still dilutes the
    /// vote window toward "stable").
    pub fn detect(&mut self, landmarks: &[Landmark], timestamp: f64) -> Option<FallEvent> {
        if landmarks.len() <= RIGHT_HIP {
            self.push_vote(false);
            return None;
        }
        let min_vis = [LEFT_SHOULDER, RIGHT_SHOULDER, LEFT_HIP, RIGHT_HIP]
            .iter()
            .map(|&i| landmarks[i].visibility)
            .fold(f32::INFINITY, f32::min);
        if min_vis < self.min_conf {
            self.push_vote(false);
            return None;
        }

        let ratio = Self::torso_ratio(landmarks);
        let is_fall_vote = ratio < self.ratio_thresh;
        self.push_vote(is_fall_vote);
        let score =
            self.window.iter().filter(|&&v| v).count() as f32 / self.window.len() as f32;
        Some(FallEvent {
            is_fall: score > 0.6,
            score,
            ratio,
            timestamp,
        })
    }
}

impl Default for FallDetector {
    fn default() -> Self {
        Self::new(0.8, 12, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sh: [(f32, f32); 2], hip: [(f32, f32); 2], vis: f32) -> Vec<Landmark> {
        let mut lms = vec![Landmark::default(); 33];
        for (i, &(x, y)) in [LEFT_SHOULDER, RIGHT_SHOULDER]
            .iter()
            .zip(sh.iter())
        {
            lms[*i] = Landmark { x, y, visibility: vis };
        }
        for (i, &(x, y)) in [LEFT_HIP, RIGHT_HIP].iter().zip(hip.iter()) {
            lms[*i] = Landmark { x, y, visibility: vis };
        }
        lms
    }

    fn upright() -> Vec<Landmark> {
        // Torso vertical: shoulders above hips
        frame([(0.45, 0.3), (0.55, 0.3)], [(0.45, 0.7), (0.55, 0.7)], 0.9)
    }

    fn fallen() -> Vec<Landmark> {
        // Torso horizontal: shoulders left of hips at the same height
        frame([(0.1, 0.5), (0.15, 0.52)], [(0.6, 0.5), (0.65, 0.52)], 0.9)
    }

    #[test]
    fn upright_is_stable() {
        let mut det = FallDetector::default();
        for _ in 0..12 {
            let event = det.detect(&upright(), 0.0).unwrap();
            assert!(!event.is_fall);
            assert_eq!(event.score, 0.0);
            assert!(event.ratio > 0.8);
        }
    }

    #[test]
    fn lying_flat_trips_immediately_on_empty_window() {
        let mut det = FallDetector::default();
        let event = det.detect(&fallen(), 1.5).unwrap();
        assert!(event.is_fall);
        assert_eq!(event.score, 1.0);
        assert!(event.ratio < 0.8);
        assert_eq!(event.timestamp, 1.5);
    }

    #[test]
    fn stable_history_delays_the_fall_verdict() {
        let mut det = FallDetector::default();
        for _ in 0..6 {
            det.detect(&upright(), 0.0);
        }
        // 7 fall votes against 5 surviving stable votes: 7/12 = 0.583, not yet
        let mut last = None;
        for _ in 0..7 {
            last = det.detect(&fallen(), 0.0);
        }
        assert!(!last.unwrap().is_fall);
        // One more slides a stable vote out: 8/12 = 0.667
        let event = det.detect(&fallen(), 0.0).unwrap();
        assert!(event.is_fall);
    }

    #[test]
    fn low_visibility_yields_no_event_and_dilutes() {
        let mut det = FallDetector::default();
        det.detect(&fallen(), 0.0);
        let murky = frame([(0.1, 0.5), (0.15, 0.52)], [(0.6, 0.5), (0.65, 0.52)], 0.2);
        assert!(det.detect(&murky, 0.0).is_none());
        // Window now holds one fall vote and one stable vote
        let event = det.detect(&fallen(), 0.0).unwrap();
        assert!((event.score - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn short_landmark_list_yields_no_event() {
        let mut det = FallDetector::default();
        assert!(det.detect(&[Landmark::default(); 5], 0.0).is_none());
    }

    #[test]
    fn recovery_drops_the_score_back() {
        let mut det = FallDetector::default();
        for _ in 0..12 {
            det.detect(&fallen(), 0.0);
        }
        let mut event = det.detect(&upright(), 0.0).unwrap();
        assert!(event.is_fall); // 11/12 still above threshold
        for _ in 0..7 {
            event = det.detect(&upright(), 0.0).unwrap();
        }
        assert!(!event.is_fall); // 4/12 by now
    }
}
