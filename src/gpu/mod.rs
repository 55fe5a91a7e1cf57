//! GPU timing backends.
//!
//! - [`RasterGpuTimer`]: elapsed-time queries on a GL-style context, polled
//!   once per update.
//! - [`TimestampGpuTimer`]: begin/end-of-pass timestamps resolved into two
//!   alternating readback buffers, read asynchronously.

mod raster;
mod timestamp;
mod wgpu_timestamps;

use std::any::Any;

use futures::future::LocalBoxFuture;

use crate::error::StatsError;

pub use raster::RasterGpuTimer;
pub use timestamp::{SharedResolve, TimestampGpuTimer};
pub use wgpu_timestamps::WgpuTimestamps;

/// Mapping state of a readback buffer, as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMapState {
    Unmapped,
    Pending,
    Mapped,
}

/// Device-side resources of the timestamp backend.
///
/// Implementations own a 2-entry timestamp query set, a resolve buffer and
/// two readback buffers addressed by `slot` (0 or 1).
pub trait TimestampDevice {
    fn read_buffer_state(&self, slot: usize) -> BufferMapState;

    /// Record resolve + copy of the query set into readback buffer `slot`.
    ///
    /// `encoder` is whatever command encoder type the device records into;
    /// implementations downcast it and fail with
    /// [`StatsError::EncoderMismatch`] on anything else.
    fn record_resolve(&mut self, encoder: &mut dyn Any, slot: usize) -> Result<(), StatsError>;

    /// Start mapping readback buffer `slot` and return the begin and end
    /// timestamps once the mapping completes. The buffer is unmapped before
    /// the future resolves.
    fn read_timestamps(&mut self, slot: usize)
        -> LocalBoxFuture<'static, Result<[u64; 2], StatsError>>;

    /// Nanoseconds per timestamp tick.
    fn timestamp_period_ns(&self) -> f32 {
        1.0
    }

    /// Give the device a chance to run mapping callbacks without blocking.
    fn poll(&self) {}

    /// Timestamp writes to attach to the render pass being measured.
    fn timestamp_writes(&self) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        None
    }

    /// Destroy every owned GPU resource. Must tolerate repeated calls.
    fn release(&mut self);
}
