//! Rolling statistics buffer for one tracked metric.
//!
//! Every appended value lands in two FIFO windows: a longer "recent" window
//! that feeds numeric readouts and max tracking, and a shorter "graph"
//! window that feeds the sparkline.

use std::collections::VecDeque;

use crate::constants::{DEFAULT_GRAPH_WINDOW, DEFAULT_RECENT_WINDOW};

/// Bounded recent/graph windows for a scalar metric.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    recent: VecDeque<f64>,
    graph: VecDeque<f64>,
    recent_capacity: usize,
    graph_capacity: usize,
}

impl Default for MetricSeries {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_WINDOW, DEFAULT_GRAPH_WINDOW)
    }
}

impl MetricSeries {
    /// Create a series. Capacities are at least 1 and the graph window never
    /// outgrows the recent window.
    pub fn new(recent_capacity: usize, graph_capacity: usize) -> Self {
        let recent_capacity = recent_capacity.max(1);
        let graph_capacity = graph_capacity.clamp(1, recent_capacity);
        Self {
            recent: VecDeque::with_capacity(recent_capacity),
            graph: VecDeque::with_capacity(graph_capacity),
            recent_capacity,
            graph_capacity,
        }
    }

    /// Push a value into both windows, evicting the oldest on overflow.
    pub fn append(&mut self, value: f64) {
        push_bounded(&mut self.recent, self.recent_capacity, value);
        push_bounded(&mut self.graph, self.graph_capacity, value);
    }

    /// Most recent value, or 0 when nothing was appended yet.
    pub fn latest(&self) -> f64 {
        self.latest_sample().unwrap_or(0.0)
    }

    pub fn latest_sample(&self) -> Option<f64> {
        self.recent.back().copied()
    }

    pub fn recent(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.recent.iter().copied()
    }

    pub fn graph(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.graph.iter().copied()
    }

    /// Largest value in the recent window (0 when empty).
    pub fn recent_max(&self) -> f64 {
        self.recent.iter().copied().fold(0.0, f64::max)
    }

    /// Upper bound for the sparkline: max over both windows.
    pub fn graph_max(&self) -> f64 {
        self.graph.iter().copied().fold(self.recent_max(), f64::max)
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn recent_capacity(&self) -> usize {
        self.recent_capacity
    }

    pub fn graph_capacity(&self) -> usize {
        self.graph_capacity
    }

    pub fn clear(&mut self) {
        self.recent.clear();
        self.graph.clear();
    }
}

fn push_bounded(window: &mut VecDeque<f64>, capacity: usize, value: f64) {
    window.push_back(value);
    while window.len() > capacity {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_keep_the_most_recent_values_in_order() {
        for n in [0usize, 1, 9, 10, 11, 39, 40, 41, 137] {
            let mut series = MetricSeries::new(40, 10);
            for i in 0..n {
                series.append(i as f64);
            }

            let recent: Vec<f64> = series.recent().collect();
            let expected: Vec<f64> = (n.saturating_sub(40)..n).map(|i| i as f64).collect();
            assert_eq!(recent, expected, "recent window after {n} appends");

            let graph: Vec<f64> = series.graph().collect();
            let expected: Vec<f64> = (n.saturating_sub(10)..n).map(|i| i as f64).collect();
            assert_eq!(graph, expected, "graph window after {n} appends");
        }
    }

    #[test]
    fn latest_defaults_to_zero() {
        let mut series = MetricSeries::default();
        assert_eq!(series.latest(), 0.0);
        assert_eq!(series.latest_sample(), None);
        series.append(3.5);
        series.append(1.25);
        assert_eq!(series.latest(), 1.25);
    }

    #[test]
    fn graph_capacity_is_clamped_to_recent() {
        let series = MetricSeries::new(5, 50);
        assert_eq!(series.graph_capacity(), 5);

        let series = MetricSeries::new(0, 0);
        assert_eq!(series.recent_capacity(), 1);
        assert_eq!(series.graph_capacity(), 1);
    }

    #[test]
    fn maxima_cover_both_windows() {
        let mut series = MetricSeries::new(4, 2);
        for v in [9.0, 1.0, 2.0, 3.0] {
            series.append(v);
        }
        assert_eq!(series.recent_max(), 9.0);
        assert_eq!(series.graph_max(), 9.0);

        series.append(0.5);
        assert_eq!(series.recent_max(), 3.0);
        assert_eq!(series.graph_max(), 3.0);
    }

    #[test]
    fn clear_empties_both_windows() {
        let mut series = MetricSeries::new(3, 2);
        series.append(1.0);
        series.clear();
        assert!(series.is_empty());
        assert_eq!(series.graph().len(), 0);
    }
}
