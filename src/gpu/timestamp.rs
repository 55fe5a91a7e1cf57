use std::{any::Any, cell::Cell, rc::Rc};

use bevy::log::debug;
use futures::{
    future::{self, LocalBoxFuture, Shared},
    FutureExt,
};

use super::{BufferMapState, TimestampDevice};
use crate::{
    constants::{NANOS_PER_MILLI, TIMESTAMP_READ_BUFFERS, TIMESTAMP_WARMUP_FRAMES},
    error::StatsError,
};

/// In-flight (or already settled) GPU duration in milliseconds.
pub type SharedResolve = Shared<LocalBoxFuture<'static, f64>>;

/// Double-buffered timestamp backend.
///
/// `end()` records into the write buffer, `resolve_async()` swaps the
/// buffers and reads the other one. Reads never block the frame, and at
/// most one read is in flight.
pub struct TimestampGpuTimer {
    device: Box<dyn TimestampDevice>,
    write_index: usize,
    frames_submitted: u64,
    /// Set by `resolve_async`, cleared by `end`. One buffer swap per frame.
    resolved_since_end: bool,
    cached_ms: Rc<Cell<f64>>,
    pending: Option<SharedResolve>,
}

impl TimestampGpuTimer {
    pub fn new(device: Box<dyn TimestampDevice>) -> Self {
        Self {
            device,
            write_index: 0,
            frames_submitted: 0,
            resolved_since_end: false,
            cached_ms: Rc::new(Cell::new(0.0)),
            pending: None,
        }
    }

    /// Record the resolve for this frame into the write buffer.
    ///
    /// Without an encoder nothing is recorded and the frame does not count
    /// towards the warm-up. A write buffer that is still being read back is
    /// skipped.
    pub fn end(&mut self, encoder: Option<&mut dyn Any>) {
        self.resolved_since_end = false;
        let Some(encoder) = encoder else {
            return;
        };
        self.frames_submitted += 1;
        if self.device.read_buffer_state(self.write_index) != BufferMapState::Unmapped {
            return;
        }
        if let Err(err) = self.device.record_resolve(encoder, self.write_index) {
            debug!("GPU timestamp resolve not recorded: {err}");
        }
    }

    /// Start reading the previous frame's timestamps. Call after submission.
    ///
    /// While a read is in flight every call returns a clone of the same
    /// future. Before two frames were submitted, or when the read buffer is
    /// not unmapped, the returned future is already resolved to the last
    /// known duration. Read failures also resolve to the last known duration.
    pub fn resolve_async(&mut self) -> SharedResolve {
        self.resolved_since_end = true;
        if let Some(pending) = &self.pending {
            if pending.peek().is_none() {
                return pending.clone();
            }
            self.pending = None;
        }

        let read_index = (self.write_index + 1) % TIMESTAMP_READ_BUFFERS;
        self.write_index = read_index;

        let cached = Rc::clone(&self.cached_ms);
        if self.frames_submitted < TIMESTAMP_WARMUP_FRAMES
            || self.device.read_buffer_state(read_index) != BufferMapState::Unmapped
        {
            return future::ready(cached.get()).boxed_local().shared();
        }

        let period_ns = f64::from(self.device.timestamp_period_ns());
        let read = self.device.read_timestamps(read_index);
        let resolve = async move {
            let result = read
                .await
                .and_then(|[start, end]| ticks_to_ms(start, end, period_ns));
            match result {
                Ok(ms) => {
                    cached.set(ms);
                    ms
                }
                Err(err) => {
                    debug!("GPU timestamp readback failed: {err}");
                    cached.get()
                }
            }
        }
        .boxed_local()
        .shared();

        self.pending = Some(resolve.clone());
        resolve
    }

    /// Drive the in-flight read, if any, without blocking.
    pub fn poll_pending(&mut self) {
        self.device.poll();
        if let Some(pending) = &self.pending {
            if pending.clone().now_or_never().is_some() {
                self.pending = None;
            }
        }
    }

    /// Last successfully read GPU duration in milliseconds.
    pub fn last_duration_ms(&self) -> f64 {
        self.cached_ms.get()
    }

    pub fn is_resolving(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.peek().is_none())
    }

    /// Whether `resolve_async` already ran for the last submitted frame.
    pub fn resolved_since_end(&self) -> bool {
        self.resolved_since_end
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn device(&self) -> &dyn TimestampDevice {
        self.device.as_ref()
    }

    pub fn release(&mut self) {
        self.pending = None;
        self.device.release();
    }
}

fn ticks_to_ms(start: u64, end: u64, period_ns: f64) -> Result<f64, StatsError> {
    let ticks = end
        .checked_sub(start)
        .ok_or(StatsError::InvalidInterval(end as f64 - start as f64))?;
    Ok(ticks as f64 * period_ns / NANOS_PER_MILLI)
}
