//! Sliding one-second frame counter.

use std::collections::VecDeque;

use crate::constants::FPS_WINDOW_MS;

/// Counts the frames whose timestamps fall inside the trailing second.
#[derive(Debug, Default, Clone)]
pub struct FrameRateCounter {
    timestamps: VecDeque<f64>,
}

impl FrameRateCounter {
    /// Record a frame at `now_ms` and return how many frames were seen in
    /// the last second, this one included.
    pub fn tick(&mut self, now_ms: f64) -> usize {
        self.timestamps.push_back(now_ms);
        let cutoff = now_ms - FPS_WINDOW_MS;
        while self.timestamps.front().is_some_and(|&t| t <= cutoff) {
            self.timestamps.pop_front();
        }
        self.timestamps.len()
    }

    pub fn frames_in_window(&self) -> usize {
        self.timestamps.len()
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
    }
}
