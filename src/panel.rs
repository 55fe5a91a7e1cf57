//! Per-metric display state and the readouts handed to the display layer.

use std::ops::{Index, IndexMut};

use bevy::color::Color;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{SMOOTHING_NEW_WEIGHT, SMOOTHING_OLD_WEIGHT},
    series::MetricSeries,
};

/// Metrics shown by the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Frames in the trailing second
    Fps,
    /// CPU time of the local begin/end cycle
    Cpu,
    /// CPU time reported by a delegated worker
    WorkerCpu,
    /// GPU render time
    Gpu,
    /// GPU compute time
    GpuCompute,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Fps,
        Metric::Cpu,
        Metric::WorkerCpu,
        Metric::Gpu,
        Metric::GpuCompute,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Fps => "FPS",
            Metric::Cpu => "CPU",
            Metric::WorkerCpu => "WRK",
            Metric::Gpu => "GPU",
            Metric::GpuCompute => "CPT",
        }
    }

    /// Foreground color of the readout and sparkline.
    pub fn color(self) -> Color {
        match self {
            Metric::Fps => Color::srgb(0.0, 1.0, 1.0),
            Metric::Cpu => Color::srgb(0.0, 1.0, 0.0),
            Metric::WorkerCpu => Color::srgb(1.0, 0.6, 0.0),
            Metric::Gpu => Color::srgb(1.0, 1.0, 0.0),
            Metric::GpuCompute => Color::srgb_u8(0xe1, 0xe1, 0xe1),
        }
    }

    /// Background color of the row.
    pub fn background(self) -> Color {
        match self {
            Metric::Fps => Color::srgb_u8(0x00, 0x00, 0x22),
            Metric::Cpu => Color::srgb_u8(0x00, 0x22, 0x00),
            Metric::WorkerCpu | Metric::Gpu => Color::srgb_u8(0x22, 0x22, 0x00),
            Metric::GpuCompute => Color::srgb_u8(0x21, 0x21, 0x21),
        }
    }

    /// Frame rate is a whole count, timings are milliseconds.
    pub fn is_duration(self) -> bool {
        !matches!(self, Metric::Fps)
    }
}

/// Smoothed value and observed extremes of one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelState {
    pub smoothed: f64,
    pub max: f64,
    pub min: f64,
}

impl Default for PanelState {
    fn default() -> Self {
        Self {
            smoothed: 0.0,
            max: 0.0,
            min: f64::INFINITY,
        }
    }
}

impl PanelState {
    /// Fold the series' latest value into the state.
    ///
    /// `max` tracks the recent window, `min` is the lowest value ever seen and
    /// `smoothed` moves 30% of the way towards the latest value. Returns
    /// `None` while the series is empty.
    pub fn observe(&mut self, series: &MetricSeries) -> Option<f64> {
        let current = series.latest_sample()?;
        self.max = series.recent_max();
        self.min = self.min.min(current);
        self.smoothed = self.smoothed * SMOOTHING_OLD_WEIGHT + current * SMOOTHING_NEW_WEIGHT;
        Some(current)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One value of `T` per [`Metric`], indexed by the enum.
#[derive(Debug, Clone, Default)]
pub struct MetricPanels<T> {
    pub fps: T,
    pub cpu: T,
    pub worker_cpu: T,
    pub gpu: T,
    pub gpu_compute: T,
}

impl<T> MetricPanels<T> {
    pub fn from_fn(mut f: impl FnMut(Metric) -> T) -> Self {
        Self {
            fps: f(Metric::Fps),
            cpu: f(Metric::Cpu),
            worker_cpu: f(Metric::WorkerCpu),
            gpu: f(Metric::Gpu),
            gpu_compute: f(Metric::GpuCompute),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, &T)> {
        Metric::ALL.into_iter().map(move |m| (m, &self[m]))
    }
}

impl<T> Index<Metric> for MetricPanels<T> {
    type Output = T;

    fn index(&self, metric: Metric) -> &T {
        match metric {
            Metric::Fps => &self.fps,
            Metric::Cpu => &self.cpu,
            Metric::WorkerCpu => &self.worker_cpu,
            Metric::Gpu => &self.gpu,
            Metric::GpuCompute => &self.gpu_compute,
        }
    }
}

impl<T> IndexMut<Metric> for MetricPanels<T> {
    fn index_mut(&mut self, metric: Metric) -> &mut T {
        match metric {
            Metric::Fps => &mut self.fps,
            Metric::Cpu => &mut self.cpu,
            Metric::WorkerCpu => &mut self.worker_cpu,
            Metric::Gpu => &mut self.gpu,
            Metric::GpuCompute => &mut self.gpu_compute,
        }
    }
}

/// Text readout for one metric, produced when the text duty cycle elapses.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelReadout {
    pub metric: Metric,
    pub value: f64,
    pub max: f64,
    pub min: f64,
    pub precision: usize,
    /// Value comes from a delegated worker
    pub worker: bool,
}

impl PanelReadout {
    pub fn format(&self) -> String {
        let suffix = if self.worker { " \u{26ed}" } else { "" };
        let p = self.precision;
        format!(
            "{} {:.p$}{suffix} ({:.p$}-{:.p$})",
            self.metric.label(),
            self.value,
            self.min,
            self.max,
        )
    }
}

/// Sparkline point for one metric, produced when the graph duty cycle elapses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphSample {
    pub metric: Metric,
    pub value: f64,
    pub graph_max: f64,
}

impl GraphSample {
    /// Height of the sample relative to the graph maximum, in `[0, 1]`.
    pub fn normalized(&self) -> f32 {
        if self.graph_max <= 0.0 {
            return 0.0;
        }
        (self.value / self.graph_max).clamp(0.0, 1.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_converges_geometrically() {
        let mut series = MetricSeries::default();
        let mut state = PanelState::default();
        let target = 8.0;
        for n in 1..=30 {
            series.append(target);
            state.observe(&series);
            let bound = target * 0.7f64.powi(n) + 1e-9;
            assert!((target - state.smoothed).abs() <= bound, "tick {n}");
        }
        assert!((state.smoothed - target).abs() < 0.001);
    }

    #[test]
    fn extremes_follow_window_and_history() {
        let mut series = MetricSeries::new(2, 2);
        let mut state = PanelState::default();
        assert_eq!(state.observe(&series), None);

        for v in [5.0, 1.0, 3.0, 4.0] {
            series.append(v);
            state.observe(&series);
        }
        assert_eq!(state.max, 4.0);
        assert_eq!(state.min, 1.0);
    }

    #[test]
    fn panels_index_by_metric() {
        let mut panels = MetricPanels::from_fn(|m| m.label().len());
        panels[Metric::Gpu] = 7;
        assert_eq!(panels.gpu, 7);
        assert_eq!(panels[Metric::WorkerCpu], 3);
        assert_eq!(panels.iter().count(), Metric::ALL.len());
    }

    #[test]
    fn readout_formatting() {
        let readout = PanelReadout {
            metric: Metric::Cpu,
            value: 1.23456,
            max: 3.0,
            min: 0.5,
            precision: 2,
            worker: false,
        };
        assert_eq!(readout.format(), "CPU 1.23 (0.50-3.00)");

        let fps = PanelReadout {
            metric: Metric::Fps,
            value: 59.6,
            max: 61.0,
            min: 58.0,
            precision: 0,
            worker: true,
        };
        assert_eq!(fps.format(), "FPS 60 \u{26ed} (58-61)");
    }

    #[test]
    fn graph_sample_normalization() {
        let sample = GraphSample {
            metric: Metric::Gpu,
            value: 2.0,
            graph_max: 8.0,
        };
        assert_eq!(sample.normalized(), 0.25);
        let empty = GraphSample {
            graph_max: 0.0,
            ..sample
        };
        assert_eq!(empty.normalized(), 0.0);
    }
}
