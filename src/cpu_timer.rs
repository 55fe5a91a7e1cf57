//! Wall-clock timing of the CPU side of one begin/end cycle.

use std::{collections::HashMap, sync::Arc};

use bevy::log::debug;

use crate::{clock::Clock, error::StatsError};

/// Named timeline of marks plus a running total of measured intervals.
///
/// Marks and measures are transient: each accumulation removes the labels it
/// used, so the timeline never grows past a handful of entries.
pub struct CpuPhaseTimer {
    clock: Arc<dyn Clock>,
    marks: HashMap<&'static str, f64>,
    measures: HashMap<&'static str, f64>,
    total_ms: f64,
}

impl CpuPhaseTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            marks: HashMap::new(),
            measures: HashMap::new(),
            total_ms: 0.0,
        }
    }

    /// Record `label` at the current instant, replacing a stale mark.
    pub fn mark_start(&mut self, label: &'static str) {
        self.marks.remove(label);
        let now = self.clock.now_ms();
        self.marks.insert(label, now);
    }

    /// Close the interval opened by `start`, add it to the total and clear
    /// the three labels. Failures are logged and leave the total unchanged.
    pub fn mark_end_and_accumulate(
        &mut self,
        start: &'static str,
        end: &'static str,
        measure: &'static str,
    ) {
        match self.try_measure(start, end, measure) {
            Ok(duration) => self.total_ms += duration,
            Err(err) => debug!("CPU phase measurement skipped: {err}"),
        }
        self.marks.remove(start);
        self.marks.remove(end);
        self.measures.remove(measure);
    }

    fn try_measure(
        &mut self,
        start: &'static str,
        end: &'static str,
        measure: &'static str,
    ) -> Result<f64, StatsError> {
        let now = self.clock.now_ms();
        // First frame: no begin() yet, so the interval reads as zero.
        let start_at = *self.marks.entry(start).or_insert(now);
        self.marks.insert(end, now);

        let duration = now - start_at;
        if !duration.is_finite() || duration < 0.0 {
            return Err(StatsError::InvalidInterval(duration));
        }
        self.measures.insert(measure, duration);
        Ok(duration)
    }

    /// Time accumulated since the last [`CpuPhaseTimer::take_total`].
    pub fn total_ms(&self) -> f64 {
        self.total_ms
    }

    /// Return the accumulated time and reset it to zero.
    pub fn take_total(&mut self) -> f64 {
        std::mem::take(&mut self.total_ms)
    }

    pub fn has_mark(&self, label: &str) -> bool {
        self.marks.contains_key(label)
    }

    /// Number of live marks and measures on the timeline.
    pub fn timeline_len(&self) -> usize {
        self.marks.len() + self.measures.len()
    }

    pub fn reset(&mut self) {
        self.marks.clear();
        self.measures.clear();
        self.total_ms = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        constants::{CPU_DURATION_MEASURE, CPU_FINISHED_MARK, CPU_STARTED_MARK},
    };

    fn timer() -> (ManualClock, CpuPhaseTimer) {
        let clock = ManualClock::new(100.0);
        let timer = CpuPhaseTimer::new(Arc::new(clock.clone()));
        (clock, timer)
    }

    fn close(timer: &mut CpuPhaseTimer) {
        timer.mark_end_and_accumulate(CPU_STARTED_MARK, CPU_FINISHED_MARK, CPU_DURATION_MEASURE);
    }

    #[test]
    fn accumulates_intervals_and_clears_marks() {
        let (clock, mut timer) = timer();
        timer.mark_start(CPU_STARTED_MARK);
        clock.advance(4.0);
        close(&mut timer);
        assert_eq!(timer.total_ms(), 4.0);
        assert_eq!(timer.timeline_len(), 0);

        timer.mark_start(CPU_STARTED_MARK);
        clock.advance(2.5);
        close(&mut timer);
        assert_eq!(timer.take_total(), 6.5);
        assert_eq!(timer.total_ms(), 0.0);
    }

    #[test]
    fn missing_start_reads_as_zero() {
        let (clock, mut timer) = timer();
        clock.advance(10.0);
        close(&mut timer);
        assert_eq!(timer.total_ms(), 0.0);
        assert_eq!(timer.timeline_len(), 0);
    }

    #[test]
    fn restart_replaces_stale_mark() {
        let (clock, mut timer) = timer();
        timer.mark_start(CPU_STARTED_MARK);
        clock.advance(50.0);
        timer.mark_start(CPU_STARTED_MARK);
        clock.advance(1.0);
        close(&mut timer);
        assert_eq!(timer.total_ms(), 1.0);
    }

    #[test]
    fn backwards_clock_is_dropped_not_accumulated() {
        let (clock, mut timer) = timer();
        timer.mark_start(CPU_STARTED_MARK);
        clock.set(90.0);
        close(&mut timer);
        assert_eq!(timer.total_ms(), 0.0);
        assert!(!timer.has_mark(CPU_STARTED_MARK));
        assert_eq!(timer.timeline_len(), 0);
    }
}
