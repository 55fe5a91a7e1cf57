//! Display refresh-rate inference from consecutive frame intervals.
//!
//! The estimate is recomputed from the whole interval history on every
//! observation. It is only reported when the intervals are stable (standard
//! deviation under [`VSYNC_STABILITY_THRESHOLD_MS`]) and their mean is within
//! [`VSYNC_RELATIVE_TOLERANCE`] of a known refresh rate.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::constants::{
    VSYNC_HISTORY_SIZE, VSYNC_MIN_SAMPLES, VSYNC_RELATIVE_TOLERANCE, VSYNC_STABILITY_THRESHOLD_MS,
};

/// A nominal display refresh rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefreshRate {
    pub hz: u32,
    pub frame_time_ms: f64,
}

impl RefreshRate {
    pub const fn new(hz: u32, frame_time_ms: f64) -> Self {
        Self { hz, frame_time_ms }
    }
}

/// Refresh rates the estimator can match against.
pub const REFRESH_RATES: [RefreshRate; 7] = [
    RefreshRate::new(60, 16.67),
    RefreshRate::new(75, 13.33),
    RefreshRate::new(90, 11.11),
    RefreshRate::new(120, 8.33),
    RefreshRate::new(144, 6.94),
    RefreshRate::new(165, 6.06),
    RefreshRate::new(240, 4.17),
];

#[derive(Debug, Clone)]
pub struct VSyncEstimator {
    last: Option<f64>,
    intervals: VecDeque<f64>,
    detected: Option<RefreshRate>,
}

impl Default for VSyncEstimator {
    fn default() -> Self {
        Self {
            last: None,
            intervals: VecDeque::with_capacity(VSYNC_HISTORY_SIZE),
            detected: None,
        }
    }
}

impl VSyncEstimator {
    /// Record a frame at `now_ms` and return the current estimate.
    pub fn observe(&mut self, now_ms: f64) -> Option<RefreshRate> {
        let Some(last) = self.last.replace(now_ms) else {
            return self.detected;
        };

        self.intervals.push_back(now_ms - last);
        while self.intervals.len() > VSYNC_HISTORY_SIZE {
            self.intervals.pop_front();
        }

        if self.intervals.len() >= VSYNC_MIN_SAMPLES {
            self.detected = estimate(self.intervals.iter().copied());
        }
        self.detected
    }

    pub fn detected(&self) -> Option<RefreshRate> {
        self.detected
    }

    pub fn sample_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn estimate(intervals: impl ExactSizeIterator<Item = f64> + Clone) -> Option<RefreshRate> {
    let n = intervals.len() as f64;
    let mean = intervals.clone().sum::<f64>() / n;
    let variance = intervals.map(|i| (i - mean).powi(2)).sum::<f64>() / n;
    if variance.sqrt() > VSYNC_STABILITY_THRESHOLD_MS {
        return None;
    }

    let closest = REFRESH_RATES.iter().min_by(|a, b| {
        (mean - a.frame_time_ms)
            .abs()
            .total_cmp(&(mean - b.frame_time_ms).abs())
    })?;
    let relative_error = (mean - closest.frame_time_ms).abs() / closest.frame_time_ms;
    (relative_error <= VSYNC_RELATIVE_TOLERANCE).then_some(*closest)
}
