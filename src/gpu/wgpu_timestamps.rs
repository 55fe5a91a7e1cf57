use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{channel::oneshot, future::LocalBoxFuture, FutureExt};

use super::{BufferMapState, TimestampDevice};
use crate::{
    constants::{TIMESTAMP_PAIR_BYTES, TIMESTAMP_READ_BUFFERS},
    error::StatsError,
};

/// Readback buffer plus the map state wgpu does not expose.
struct ReadBuffer {
    buffer: wgpu::Buffer,
    /// A map was requested and the buffer is not unmapped yet
    busy: AtomicBool,
    /// The map callback reported success
    mapped: AtomicBool,
}

impl ReadBuffer {
    fn state(&self) -> BufferMapState {
        match (
            self.busy.load(Ordering::SeqCst),
            self.mapped.load(Ordering::SeqCst),
        ) {
            (false, _) => BufferMapState::Unmapped,
            (true, false) => BufferMapState::Pending,
            (true, true) => BufferMapState::Mapped,
        }
    }

    fn unmap(&self) {
        self.buffer.unmap();
        self.mapped.store(false, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// [`TimestampDevice`] over a wgpu device with `TIMESTAMP_QUERY`.
///
/// Attach [`WgpuTimestamps::timestamp_writes`] to the measured render pass
/// and pass the frame's `wgpu::CommandEncoder` to `Stats::end`.
pub struct WgpuTimestamps {
    device: Arc<wgpu::Device>,
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    read_buffers: [Arc<ReadBuffer>; TIMESTAMP_READ_BUFFERS],
    period_ns: f32,
    released: bool,
}

impl WgpuTimestamps {
    /// Whether the device can run timestamp queries at all.
    pub fn supported(device: &wgpu::Device) -> bool {
        device.features().contains(wgpu::Features::TIMESTAMP_QUERY)
    }

    /// Create the query set and buffers. Returns `None` without `TIMESTAMP_QUERY`.
    pub fn new(device: Arc<wgpu::Device>, queue: &wgpu::Queue) -> Option<Self> {
        if !Self::supported(&device) {
            return None;
        }

        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("frame_stats_timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame_stats_timestamp_resolve"),
            size: TIMESTAMP_PAIR_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let read_buffers = std::array::from_fn(|_| {
            Arc::new(ReadBuffer {
                buffer: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("frame_stats_timestamp_read"),
                    size: TIMESTAMP_PAIR_BYTES,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                }),
                busy: AtomicBool::new(false),
                mapped: AtomicBool::new(false),
            })
        });

        Some(Self {
            period_ns: queue.get_timestamp_period(),
            device,
            query_set,
            resolve_buffer,
            read_buffers,
            released: false,
        })
    }

    pub fn query_set(&self) -> &wgpu::QuerySet {
        &self.query_set
    }
}

impl TimestampDevice for WgpuTimestamps {
    fn read_buffer_state(&self, slot: usize) -> BufferMapState {
        self.read_buffers[slot].state()
    }

    fn record_resolve(&mut self, encoder: &mut dyn Any, slot: usize) -> Result<(), StatsError> {
        let encoder = encoder
            .downcast_mut::<wgpu::CommandEncoder>()
            .ok_or(StatsError::EncoderMismatch {
                expected: "wgpu::CommandEncoder",
            })?;
        encoder.resolve_query_set(&self.query_set, 0..2, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(
            &self.resolve_buffer,
            0,
            &self.read_buffers[slot].buffer,
            0,
            TIMESTAMP_PAIR_BYTES,
        );
        Ok(())
    }

    fn read_timestamps(
        &mut self,
        slot: usize,
    ) -> LocalBoxFuture<'static, Result<[u64; 2], StatsError>> {
        let read = Arc::clone(&self.read_buffers[slot]);
        read.busy.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let callback_read = Arc::clone(&read);
        read.buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if result.is_ok() {
                    callback_read.mapped.store(true, Ordering::SeqCst);
                } else {
                    callback_read.busy.store(false, Ordering::SeqCst);
                }
                let _ = tx.send(result);
            });

        async move {
            match rx.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(StatsError::BufferMap(err.to_string())),
                Err(_) => {
                    read.busy.store(false, Ordering::SeqCst);
                    return Err(StatsError::MapCancelled);
                }
            }
            let stamps = {
                let view = read.buffer.slice(..).get_mapped_range();
                bytemuck::pod_read_unaligned::<[u64; 2]>(&view[..TIMESTAMP_PAIR_BYTES as usize])
            };
            read.unmap();
            Ok(stamps)
        }
        .boxed_local()
    }

    fn timestamp_period_ns(&self) -> f32 {
        self.period_ns
    }

    fn poll(&self) {
        let _ = self.device.poll(wgpu::Maintain::Poll);
    }

    fn timestamp_writes(&self) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        Some(wgpu::RenderPassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        })
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.resolve_buffer.destroy();
        for read in &self.read_buffers {
            read.buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wgpu_device;

    #[test]
    fn creates_resources_or_skips() {
        let Some((device, queue)) = wgpu_device() else {
            println!("Skipping timestamp test: no adapter available.");
            return;
        };
        let Some(mut timestamps) = WgpuTimestamps::new(device, &queue) else {
            println!("Skipping timestamp test: TIMESTAMP_QUERY not available.");
            return;
        };

        assert_eq!(timestamps.read_buffer_state(0), BufferMapState::Unmapped);
        assert_eq!(timestamps.read_buffer_state(1), BufferMapState::Unmapped);
        assert!(timestamps.timestamp_period_ns() > 0.0);
        let writes = timestamps.timestamp_writes();
        assert!(writes.is_some_and(|w| w.end_of_pass_write_index == Some(1)));

        timestamps.release();
        timestamps.release();
    }

    #[test]
    fn read_keeps_buffer_busy_until_unmapped() {
        let Some((device, queue)) = wgpu_device() else {
            return;
        };
        let Some(mut timestamps) = WgpuTimestamps::new(device.clone(), &queue) else {
            return;
        };

        let read = timestamps.read_timestamps(1);
        assert_ne!(timestamps.read_buffer_state(1), BufferMapState::Unmapped);
        assert_eq!(timestamps.read_buffer_state(0), BufferMapState::Unmapped);
        let _ = device.poll(wgpu::Maintain::Wait);
        assert_eq!(timestamps.read_buffer_state(1), BufferMapState::Mapped);
        assert!(pollster::block_on(read).is_ok());
        assert_eq!(timestamps.read_buffer_state(1), BufferMapState::Unmapped);
        timestamps.release();
    }

    #[test]
    fn rejects_foreign_encoders() {
        let Some((device, queue)) = wgpu_device() else {
            return;
        };
        let Some(mut timestamps) = WgpuTimestamps::new(device, &queue) else {
            return;
        };
        let mut not_an_encoder = 5u32;
        assert!(matches!(
            timestamps.record_resolve(&mut not_an_encoder, 0),
            Err(StatsError::EncoderMismatch { .. })
        ));
    }
}
