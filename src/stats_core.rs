//! Measurement core: CPU phase timing, GPU backend selection and the
//! per-metric series. Display concerns live in [`crate::Stats`].

use std::{any::Any, sync::Arc};

use bevy::log::{debug, error, info};
use futures::{future, FutureExt};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    config::StatsConfig,
    constants::{CPU_DURATION_MEASURE, CPU_FINISHED_MARK, CPU_STARTED_MARK},
    cpu_timer::CpuPhaseTimer,
    fps::FrameRateCounter,
    gpu::{RasterGpuTimer, SharedResolve, TimestampDevice, TimestampGpuTimer, WgpuTimestamps},
    panel::{Metric, MetricPanels},
    raster::RasterContext,
    series::MetricSeries,
};

/// Latest value of every measured metric, 0 where nothing was measured yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub fps: f64,
    pub cpu: f64,
    pub gpu: f64,
    pub gpu_compute: f64,
}

/// GPU timings an engine can measure on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    pub render: bool,
    pub compute: bool,
}

/// What [`StatsCore::init`] attaches to. Chosen once per instance.
pub enum StatsTarget {
    /// The engine times its own passes and reports them every frame
    /// through [`StatsCore::report_engine_timings`].
    Renderer(EngineCounters),
    /// A wgpu device: timestamp queries and wgpu preview capture.
    Device {
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    },
    /// Any other timestamp-query implementation.
    Timestamps(Box<dyn TimestampDevice>),
    /// A GL-style context: timer queries and framebuffer preview capture.
    Raster(Box<dyn RasterContext>),
}

enum GpuBackend {
    Unconfigured,
    Engine {
        counters: EngineCounters,
        render_ms: f64,
        compute_ms: f64,
    },
    Native {
        device: Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)>,
        timer: Option<TimestampGpuTimer>,
    },
    Raster {
        ctx: Box<dyn RasterContext>,
        timer: Option<RasterGpuTimer>,
    },
}

/// Frame measurements without any display state.
pub struct StatsCore {
    config: StatsConfig,
    clock: Arc<dyn Clock>,
    backend: GpuBackend,
    cpu: CpuPhaseTimer,
    frame_rate: FrameRateCounter,
    series: MetricPanels<MetricSeries>,
    frames: u64,
}

impl StatsCore {
    pub fn new(config: StatsConfig, clock: Arc<dyn Clock>) -> Self {
        let config = config.sanitized();
        let series = MetricPanels::from_fn(|_| {
            MetricSeries::new(config.recent_window_size, config.graph_window_size)
        });
        Self {
            cpu: CpuPhaseTimer::new(Arc::clone(&clock)),
            config,
            clock,
            backend: GpuBackend::Unconfigured,
            frame_rate: FrameRateCounter::default(),
            series,
            frames: 0,
        }
    }

    /// Attach to a render target. A missing target is logged and ignored.
    pub fn init(&mut self, target: Option<StatsTarget>) -> bool {
        let Some(target) = target else {
            error!("Stats init called without a target; GPU timing stays disabled");
            return false;
        };
        self.release_backend();

        let track_gpu = self.config.track_gpu;
        self.backend = match target {
            StatsTarget::Renderer(counters) => GpuBackend::Engine {
                counters,
                render_ms: 0.0,
                compute_ms: 0.0,
            },
            StatsTarget::Device { device, queue } => {
                let timer = if track_gpu {
                    WgpuTimestamps::new(Arc::clone(&device), &queue)
                        .map(|t| TimestampGpuTimer::new(Box::new(t)))
                } else {
                    None
                };
                if track_gpu && timer.is_none() {
                    info!("Device lacks TIMESTAMP_QUERY; GPU timing disabled");
                }
                GpuBackend::Native {
                    device: Some((device, queue)),
                    timer,
                }
            }
            StatsTarget::Timestamps(mut device) => {
                let timer = if track_gpu {
                    Some(TimestampGpuTimer::new(device))
                } else {
                    device.release();
                    None
                };
                GpuBackend::Native {
                    device: None,
                    timer,
                }
            }
            StatsTarget::Raster(ctx) => {
                let supported = ctx.supports_timer_queries();
                if track_gpu && !supported {
                    info!("Context has no timer queries; GPU timing disabled");
                }
                GpuBackend::Raster {
                    timer: (track_gpu && supported).then(RasterGpuTimer::default),
                    ctx,
                }
            }
        };
        true
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self.backend, GpuBackend::Unconfigured)
    }

    /// Start the frame: open the CPU phase and the GPU timer query.
    pub fn begin(&mut self) {
        self.cpu.mark_start(CPU_STARTED_MARK);
        if let GpuBackend::Raster {
            ctx,
            timer: Some(timer),
        } = &mut self.backend
        {
            timer.begin(ctx.as_mut());
        }
    }

    /// End the frame. `encoder` is the command encoder the native backend
    /// records its timestamp resolve into.
    pub fn end(&mut self, encoder: Option<&mut dyn Any>) {
        self.frames += 1;
        match &mut self.backend {
            GpuBackend::Native {
                timer: Some(timer), ..
            } => timer.end(encoder),
            GpuBackend::Raster {
                ctx,
                timer: Some(timer),
            } => timer.end(ctx.as_mut()),
            _ => {}
        }
        self.close_cpu_phase();
    }

    fn close_cpu_phase(&mut self) {
        self.cpu
            .mark_end_and_accumulate(CPU_STARTED_MARK, CPU_FINISHED_MARK, CPU_DURATION_MEASURE);
    }

    /// Start reading the last frame's timestamps. Call after submission.
    ///
    /// Resolves to the latest GPU duration in ms; outside the native backend
    /// it resolves immediately to the latest recorded value.
    pub fn resolve_timestamps_async(&mut self) -> SharedResolve {
        match &mut self.backend {
            GpuBackend::Native {
                timer: Some(timer), ..
            } => timer.resolve_async(),
            _ => future::ready(self.series.gpu.latest())
                .boxed_local()
                .shared(),
        }
    }

    /// Close the CPU phase, harvest GPU timings and append every series.
    pub fn collect_measurements(&mut self) {
        self.collect_cpu();
        self.collect_gpu();
    }

    /// Close the CPU phase and append the accumulated time to the CPU series.
    pub fn collect_cpu(&mut self) -> f64 {
        self.close_cpu_phase();
        let cpu_ms = self.cpu.take_total();
        self.series.cpu.append(cpu_ms);
        cpu_ms
    }

    fn collect_gpu(&mut self) {
        let track_compute = self.config.track_compute_gpu;
        let track_gpu = self.config.track_gpu;
        let (gpu_ms, compute_ms) = match &mut self.backend {
            GpuBackend::Native {
                timer: Some(timer), ..
            } => {
                timer.poll_pending();
                if !timer.resolved_since_end() {
                    let _ = timer.resolve_async();
                    timer.poll_pending();
                }
                (Some(timer.last_duration_ms()), None)
            }
            GpuBackend::Raster {
                ctx,
                timer: Some(timer),
            } => (Some(timer.process_pending(ctx.as_mut())), None),
            GpuBackend::Engine {
                counters,
                render_ms,
                compute_ms,
            } => (
                (track_gpu && counters.render).then_some(*render_ms),
                (track_compute && counters.compute).then_some(*compute_ms),
            ),
            _ => (None, None),
        };
        if let Some(gpu_ms) = gpu_ms {
            self.series.gpu.append(gpu_ms);
        }
        if let Some(compute_ms) = compute_ms {
            self.series.gpu_compute.append(compute_ms);
        }
    }

    /// Count this update in the trailing-second frame counter.
    pub fn tick_frame_rate(&mut self) -> Option<f64> {
        if !self.config.track_frame_rate {
            return None;
        }
        let fps = self.frame_rate.tick(self.clock.now_ms()) as f64;
        self.series.fps.append(fps);
        Some(fps)
    }

    /// Store the GPU timings measured by the engine for this frame.
    pub fn report_engine_timings(&mut self, render: Option<f64>, compute: Option<f64>) {
        match &mut self.backend {
            GpuBackend::Engine {
                render_ms,
                compute_ms,
                ..
            } => {
                if let Some(render) = render {
                    *render_ms = render;
                }
                if let Some(compute) = compute {
                    *compute_ms = compute;
                }
            }
            _ => debug!("Engine timings ignored: not attached to an engine renderer"),
        }
    }

    pub fn data(&self) -> StatsSnapshot {
        StatsSnapshot {
            fps: self.series.fps.latest(),
            cpu: self.series.cpu.latest(),
            gpu: self.series.gpu.latest(),
            gpu_compute: self.series.gpu_compute.latest(),
        }
    }

    /// Whether the GPU render column is being populated.
    pub fn gpu_tracking(&self) -> bool {
        match &self.backend {
            GpuBackend::Native { timer, .. } => timer.is_some(),
            GpuBackend::Raster { timer, .. } => timer.is_some(),
            GpuBackend::Engine { counters, .. } => self.config.track_gpu && counters.render,
            GpuBackend::Unconfigured => false,
        }
    }

    pub fn compute_tracking(&self) -> bool {
        matches!(
            &self.backend,
            GpuBackend::Engine { counters, .. } if self.config.track_compute_gpu && counters.compute
        )
    }

    /// GPU samples discarded because of a disjoint GPU state.
    pub fn dropped_gpu_samples(&self) -> u64 {
        match &self.backend {
            GpuBackend::Raster {
                timer: Some(timer), ..
            } => timer.dropped_samples(),
            _ => 0,
        }
    }

    /// Render pass timestamp writes for the native backend.
    pub fn timestamp_writes(&self) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        match &self.backend {
            GpuBackend::Native {
                timer: Some(timer), ..
            } => timer.device().timestamp_writes(),
            _ => None,
        }
    }

    pub fn raster_context_mut(&mut self) -> Option<&mut dyn RasterContext> {
        match &mut self.backend {
            GpuBackend::Raster { ctx, .. } => Some(ctx.as_mut()),
            _ => None,
        }
    }

    pub fn wgpu_device(&self) -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
        match &self.backend {
            GpuBackend::Native {
                device: Some((device, queue)),
                ..
            } => Some((Arc::clone(device), Arc::clone(queue))),
            _ => None,
        }
    }

    pub fn series(&self, metric: Metric) -> &MetricSeries {
        &self.series[metric]
    }

    pub fn series_mut(&mut self, metric: Metric) -> &mut MetricSeries {
        &mut self.series[metric]
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Frames closed with [`StatsCore::end`].
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn release_backend(&mut self) {
        match &mut self.backend {
            GpuBackend::Native {
                timer: Some(timer), ..
            } => timer.release(),
            GpuBackend::Raster {
                ctx,
                timer: Some(timer),
            } => timer.release(ctx.as_mut()),
            _ => {}
        }
        self.backend = GpuBackend::Unconfigured;
    }

    /// Release owned GPU resources, detach from the target and clear all
    /// history. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.release_backend();
        self.cpu.reset();
        self.frame_rate.clear();
        for metric in Metric::ALL {
            self.series[metric].clear();
        }
        self.frames = 0;
    }
}
