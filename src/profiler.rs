//! Headless measurement for the producing side of delegated mode.
//!
//! A [`StatsProfiler`] runs next to the renderer (another thread, another
//! process) and only measures. Its snapshots and preview bitmaps are shipped
//! to a displaying [`crate::Stats`], for example through [`crate::stats_feed`].

use std::{any::Any, sync::Arc};

use bevy::log::debug;

use crate::{
    capture::{
        fit_preview_size, CaptureJob, PreviewCapture, PreviewSize, RenderTargetSource,
        TextureSource,
    },
    clock::{Clock, SystemClock},
    config::StatsConfig,
    gpu::SharedResolve,
    stats_core::{StatsCore, StatsSnapshot, StatsTarget},
};

pub struct StatsProfiler {
    core: StatsCore,
    previews: Option<PreviewCapture>,
    preview_bounds: PreviewSize,
}

impl Default for StatsProfiler {
    fn default() -> Self {
        Self::new(StatsConfig::default())
    }
}

impl StatsProfiler {
    pub fn new(config: StatsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::default()))
    }

    pub fn with_clock(config: StatsConfig, clock: Arc<dyn Clock>) -> Self {
        let core = StatsCore::new(config, clock);
        let preview_bounds = PreviewSize::from(core.config().preview_size);
        Self {
            core,
            previews: None,
            preview_bounds,
        }
    }

    pub fn init(&mut self, target: Option<StatsTarget>) -> bool {
        self.dispose_texture_capture();
        self.core.init(target)
    }

    pub fn begin(&mut self) {
        self.core.begin();
    }

    pub fn end(&mut self, encoder: Option<&mut dyn Any>) {
        self.core.end(encoder);
    }

    pub fn resolve_timestamps_async(&mut self) -> SharedResolve {
        self.core.resolve_timestamps_async()
    }

    pub fn timestamp_writes(&self) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        self.core.timestamp_writes()
    }

    pub fn report_engine_timings(&mut self, render: Option<f64>, compute: Option<f64>) {
        self.core.report_engine_timings(render, compute);
    }

    /// Close the frame's measurements and return the latest values.
    pub fn update(&mut self) -> StatsSnapshot {
        self.core.collect_measurements();
        self.core.tick_frame_rate();
        if let Some(previews) = &self.previews {
            previews.poll();
        }
        self.core.data()
    }

    pub fn data(&self) -> StatsSnapshot {
        self.core.data()
    }

    /// Start a preview capture of `source`.
    ///
    /// The preview keeps the source's aspect ratio within the configured
    /// preview size. Capture resources are created on first use.
    pub fn capture_texture(&mut self, source: &TextureSource) -> CaptureJob {
        let (width, height) = source.size();
        let size =
            fit_preview_size(width, height, self.preview_bounds).unwrap_or(self.preview_bounds);
        let wgpu_device = self.core.wgpu_device();
        let previews = self.previews.get_or_insert_with(|| {
            let mut previews = PreviewCapture::new(size);
            if let Some((device, queue)) = wgpu_device {
                previews.attach_wgpu(device, queue);
            }
            previews
        });
        previews.resize(size, self.core.raster_context_mut());
        previews.capture(source, self.core.raster_context_mut())
    }

    /// Capture an engine render target, or `None` when it has no native
    /// texture yet.
    pub fn capture_render_target(
        &mut self,
        target: &dyn RenderTargetSource,
    ) -> Option<CaptureJob> {
        let Some(source) = target.texture_source() else {
            debug!("Render target has no native texture yet; capture skipped");
            return None;
        };
        Some(self.capture_texture(&source))
    }

    pub fn dispose_texture_capture(&mut self) {
        if let Some(mut previews) = self.previews.take() {
            previews.release(self.core.raster_context_mut());
        }
    }

    pub fn core(&self) -> &StatsCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut StatsCore {
        &mut self.core
    }

    /// Release capture and timing resources. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.dispose_texture_capture();
        self.core.dispose();
    }
}
