//! Elapsed-time query backend for GL-style contexts.

use bevy::log::debug;

use crate::{
    constants::NANOS_PER_MILLI,
    raster::{QueryHandle, RasterContext},
};

/// Opens one elapsed-time query per frame and harvests finished ones.
///
/// Results are polled, never waited for: a query stays pending until its
/// result is available, possibly several frames later.
#[derive(Debug, Default)]
pub struct RasterGpuTimer {
    active: Option<QueryHandle>,
    pending: Vec<QueryHandle>,
    dropped_samples: u64,
}

impl RasterGpuTimer {
    /// Start timing the frame's GPU work.
    pub fn begin(&mut self, ctx: &mut dyn RasterContext) {
        if let Some(stale) = self.active.take() {
            // A query left open by a missing end() spans no whole frame.
            ctx.end_time_elapsed();
            ctx.delete_query(stale);
        }
        match ctx.create_timer_query() {
            Ok(query) => {
                ctx.begin_time_elapsed(query);
                self.active = Some(query);
            }
            Err(err) => debug!("GPU timer query not started: {err}"),
        }
    }

    /// Stop the active query and queue it for harvesting.
    pub fn end(&mut self, ctx: &mut dyn RasterContext) {
        if let Some(query) = self.active.take() {
            ctx.end_time_elapsed();
            self.pending.push(query);
        }
    }

    /// Harvest every available query and return the summed GPU time in ms.
    ///
    /// Queries finished during a disjoint GPU state are deleted and counted
    /// as dropped. Unfinished queries are kept for the next pass.
    pub fn process_pending(&mut self, ctx: &mut dyn RasterContext) -> f64 {
        let mut total_ms = 0.0;
        for i in (0..self.pending.len()).rev() {
            let query = self.pending[i];
            if !ctx.query_result_available(query) {
                continue;
            }
            if ctx.gpu_disjoint() {
                self.dropped_samples += 1;
                debug!("GPU timer query {:?} dropped: disjoint GPU state", query);
            } else {
                total_ms += ctx.query_result_ns(query) as f64 / NANOS_PER_MILLI;
            }
            ctx.delete_query(query);
            self.pending.remove(i);
        }
        total_ms
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Samples discarded because the GPU reported a disjoint state.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Delete every query object still owned by the timer.
    pub fn release(&mut self, ctx: &mut dyn RasterContext) {
        if let Some(query) = self.active.take() {
            ctx.end_time_elapsed();
            ctx.delete_query(query);
        }
        for query in self.pending.drain(..) {
            ctx.delete_query(query);
        }
    }
}
