//! The orchestrator: measurement core plus duty-cycled display state,
//! delegated data, refresh-rate estimation and texture previews.

use std::{any::Any, collections::BTreeMap, sync::Arc};

use bevy::log::{debug, error, info};
use futures::{future::LocalBoxFuture, FutureExt};

use crate::{
    capture::{
        fit_preview_size, CaptureJob, PreviewBitmap, PreviewCapture, PreviewSize,
        RenderTargetSource, TextureSource,
    },
    clock::{Clock, SystemClock},
    config::StatsConfig,
    error::StatsError,
    gpu::SharedResolve,
    panel::{GraphSample, Metric, MetricPanels, PanelReadout, PanelState},
    raster::FramebufferHandle,
    series::MetricSeries,
    stats_core::{StatsCore, StatsSnapshot, StatsTarget},
    vsync::{RefreshRate, VSyncEstimator},
};

type CapturePass = LocalBoxFuture<'static, Vec<(String, Result<PreviewBitmap, StatsError>)>>;

/// A named preview slot.
#[derive(Debug, Clone, Default)]
pub struct TexturePanel {
    source: Option<TextureSource>,
    source_size: Option<(u32, u32)>,
    bitmap: Option<PreviewBitmap>,
}

impl TexturePanel {
    pub fn source(&self) -> Option<&TextureSource> {
        self.source.as_ref()
    }

    /// Size of the image the preview was taken from, for aspect-correct display.
    pub fn source_size(&self) -> Option<(u32, u32)> {
        self.source_size
    }

    pub fn bitmap(&self) -> Option<&PreviewBitmap> {
        self.bitmap.as_ref()
    }
}

/// What the display should redraw after one [`Stats::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsRefresh {
    pub text_due: bool,
    pub graph_due: bool,
    /// One readout per visible metric with data, when `text_due`
    pub text: Vec<PanelReadout>,
    /// One sparkline point per visible metric with data, when `graph_due`
    pub graph: Vec<GraphSample>,
    pub refresh_rate: Option<RefreshRate>,
    /// Texture panels whose bitmap changed since the previous update
    pub previews_updated: Vec<String>,
}

/// Per-frame performance monitor.
///
/// Call [`Stats::begin`] before the frame's GPU work, [`Stats::end`] after
/// submission and [`Stats::update`] once per frame. Text readouts refresh at
/// `text_refresh_hz`, sparklines and previews at `graph_refresh_hz`.
///
/// Once [`Stats::set_data`] is called the instance switches to delegated
/// mode: the fed snapshot replaces local GPU and frame-rate measurement and
/// the local CPU time is shown next to the worker's.
pub struct Stats {
    core: StatsCore,
    panels: MetricPanels<PanelState>,
    prev_text_ms: f64,
    prev_graph_ms: f64,
    vsync: Option<VSyncEstimator>,
    external: Option<StatsSnapshot>,
    has_new_external: bool,
    worker: bool,
    previews: PreviewCapture,
    preview_bounds: PreviewSize,
    viewport: Option<(u32, u32)>,
    texture_panels: BTreeMap<String, TexturePanel>,
    capture_task: Option<CapturePass>,
    pending_previews: Vec<String>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(StatsConfig::default())
    }
}

impl Stats {
    pub fn new(config: StatsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::default()))
    }

    pub fn with_clock(config: StatsConfig, clock: Arc<dyn Clock>) -> Self {
        let core = StatsCore::new(config, clock);
        let now = core.now_ms();
        let preview_bounds = PreviewSize::from(core.config().preview_size);
        let vsync = core
            .config()
            .track_refresh_rate
            .then(VSyncEstimator::default);
        Self {
            panels: MetricPanels::default(),
            prev_text_ms: now,
            prev_graph_ms: now,
            vsync,
            external: None,
            has_new_external: false,
            worker: false,
            previews: PreviewCapture::new(preview_bounds),
            preview_bounds,
            viewport: None,
            texture_panels: BTreeMap::new(),
            capture_task: None,
            pending_previews: Vec::new(),
            core,
        }
    }

    /// Attach to a render target. See [`StatsTarget`] for the options.
    pub fn init(&mut self, target: Option<StatsTarget>) -> bool {
        if !self.core.init(target) {
            return false;
        }
        if let Some((device, queue)) = self.core.wgpu_device() {
            self.previews.attach_wgpu(device, queue);
        }
        true
    }

    pub fn begin(&mut self) {
        self.core.begin();
    }

    /// See [`StatsCore::end`].
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

    /// Collect this frame's measurements and advance the duty cycles.
    pub fn update(&mut self) -> StatsRefresh {
        if self.worker {
            self.collect_delegated();
        } else {
            self.core.collect_measurements();
        }
        let mut refresh = self.render_panels();

        let mut updated = std::mem::take(&mut self.pending_previews);
        for name in self.poll_capture() {
            if !updated.contains(&name) {
                updated.push(name);
            }
        }
        refresh.previews_updated = updated;
        refresh
    }

    fn collect_delegated(&mut self) {
        self.core.collect_cpu();
        if !std::mem::take(&mut self.has_new_external) {
            return;
        }
        let Some(snapshot) = self.external else {
            return;
        };
        self.core.series_mut(Metric::WorkerCpu).append(snapshot.cpu);
        self.core.series_mut(Metric::Fps).append(snapshot.fps);
        self.core.series_mut(Metric::Gpu).append(snapshot.gpu);
        self.core
            .series_mut(Metric::GpuCompute)
            .append(snapshot.gpu_compute);
    }

    fn render_panels(&mut self) -> StatsRefresh {
        let now = self.core.now_ms();
        if !self.worker {
            self.core.tick_frame_rate();
        }
        let refresh_rate = self.vsync.as_mut().and_then(|vsync| vsync.observe(now));

        let config = self.core.config();
        let text_due = now >= self.prev_text_ms + config.text_interval_ms();
        let graph_due = now >= self.prev_graph_ms + config.graph_interval_ms();
        let mut refresh = StatsRefresh {
            text_due,
            graph_due,
            refresh_rate,
            ..Default::default()
        };

        for metric in self.visible_metrics() {
            let series = self.core.series(metric);
            if series.is_empty() {
                continue;
            }
            if text_due {
                let state = &mut self.panels[metric];
                state.observe(series);
                refresh.text.push(PanelReadout {
                    metric,
                    value: state.smoothed,
                    max: state.max,
                    min: state.min,
                    precision: if metric.is_duration() {
                        config.display_precision
                    } else {
                        0
                    },
                    worker: self.worker && metric != Metric::Cpu,
                });
            }
            if graph_due {
                refresh.graph.push(GraphSample {
                    metric,
                    value: series.latest(),
                    graph_max: series.graph_max(),
                });
            }
        }

        if text_due {
            self.prev_text_ms = now;
        }
        if graph_due {
            self.prev_graph_ms = now;
            self.start_capture_pass();
        }
        refresh
    }

    /// Metrics with a panel, in display order.
    pub fn visible_metrics(&self) -> Vec<Metric> {
        let config = self.core.config();
        let mut metrics = Vec::with_capacity(Metric::ALL.len());
        if config.track_frame_rate {
            metrics.push(Metric::Fps);
        }
        metrics.push(Metric::Cpu);
        if self.worker {
            metrics.push(Metric::WorkerCpu);
        }
        if config.track_gpu {
            metrics.push(Metric::Gpu);
        }
        if config.track_compute_gpu {
            metrics.push(Metric::GpuCompute);
        }
        metrics
    }

    fn start_capture_pass(&mut self) {
        if self.capture_task.is_some() {
            return;
        }
        let mut ready = Vec::new();
        let mut deferred = Vec::new();
        for (name, panel) in &self.texture_panels {
            let Some(source) = &panel.source else {
                continue;
            };
            match self.previews.capture(source, self.core.raster_context_mut()) {
                CaptureJob::Ready(result) => ready.push((name.clone(), result)),
                CaptureJob::Pending(job) => deferred.push((name.clone(), job)),
            }
        }
        if ready.is_empty() && deferred.is_empty() {
            return;
        }
        // Deferred captures share one staging buffer, so they run one after another.
        self.capture_task = Some(
            async move {
                let mut results = ready;
                for (name, job) in deferred {
                    results.push((name, job.await));
                }
                results
            }
            .boxed_local(),
        );
    }

    fn poll_capture(&mut self) -> Vec<String> {
        let Some(task) = self.capture_task.as_mut() else {
            return Vec::new();
        };
        self.previews.poll();
        let Some(results) = task.now_or_never() else {
            return Vec::new();
        };
        self.capture_task = None;

        let mut updated = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(bitmap) => {
                    if let Some(panel) = self.texture_panels.get_mut(&name) {
                        panel.bitmap = Some(bitmap);
                        updated.push(name);
                    }
                }
                Err(err) => debug!("Preview capture for `{name}` failed: {err}"),
            }
        }
        updated
    }

    /// Feed a snapshot measured elsewhere and switch to delegated mode.
    pub fn set_data(&mut self, snapshot: StatsSnapshot) {
        if !self.worker {
            info!("Stats switched to delegated mode");
            self.worker = true;
        }
        self.external = Some(snapshot);
        self.has_new_external = true;
    }

    /// Latest values: the fed snapshot in delegated mode, local ones otherwise.
    pub fn data(&self) -> StatsSnapshot {
        self.external.unwrap_or_else(|| self.core.data())
    }

    pub fn is_delegated(&self) -> bool {
        self.worker
    }

    pub fn add_texture_panel(&mut self, name: impl Into<String>) {
        self.texture_panels.entry(name.into()).or_default();
    }

    /// Capture `source` into panel `name` on every graph refresh.
    pub fn set_texture(&mut self, name: &str, source: TextureSource) {
        if let Err(err) = self.try_set_texture(name, source) {
            error!("set_texture(`{name}`) ignored: {err}");
        }
    }

    fn try_set_texture(&mut self, name: &str, source: TextureSource) -> Result<(), StatsError> {
        let compatible = match &source {
            TextureSource::Framebuffer { .. } => self.core.raster_context_mut().is_some(),
            TextureSource::Texture { .. } => self.core.wgpu_device().is_some(),
        };
        if !compatible {
            return Err(StatsError::SourceMismatch {
                source_kind: source.kind(),
                backend: match source {
                    TextureSource::Framebuffer { .. } => "rasterization",
                    TextureSource::Texture { .. } => "wgpu",
                },
            });
        }
        let panel = self
            .texture_panels
            .get_mut(name)
            .ok_or_else(|| StatsError::UnknownPanel(name.to_owned()))?;
        panel.source_size = Some(source.size());
        panel.source = Some(source);
        Ok(())
    }

    pub fn set_texture_framebuffer(
        &mut self,
        name: &str,
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    ) {
        self.set_texture(
            name,
            TextureSource::Framebuffer {
                framebuffer,
                width,
                height,
            },
        );
    }

    /// Capture an engine render target. Targets without a native handle yet
    /// are skipped until the next call.
    pub fn set_render_target(&mut self, name: &str, target: &dyn RenderTargetSource) {
        match target.texture_source() {
            Some(source) => self.set_texture(name, source),
            None => debug!("Render target for `{name}` has no native texture yet"),
        }
    }

    /// Show a bitmap captured elsewhere, typically by a delegated profiler.
    pub fn set_texture_bitmap(
        &mut self,
        name: &str,
        bitmap: PreviewBitmap,
        source_size: Option<(u32, u32)>,
    ) {
        let Some(panel) = self.texture_panels.get_mut(name) else {
            error!(
                "set_texture_bitmap ignored: {}",
                StatsError::UnknownPanel(name.to_owned())
            );
            return;
        };
        panel.source_size = source_size.or(Some((bitmap.width(), bitmap.height())));
        panel.bitmap = Some(bitmap);
        if !self.pending_previews.iter().any(|n| n == name) {
            self.pending_previews.push(name.to_owned());
        }
    }

    pub fn remove_texture_panel(&mut self, name: &str) -> Option<TexturePanel> {
        self.pending_previews.retain(|n| n != name);
        self.texture_panels.remove(name)
    }

    pub fn texture_panel(&self, name: &str) -> Option<&TexturePanel> {
        self.texture_panels.get(name)
    }

    pub fn texture_panel_names(&self) -> impl Iterator<Item = &str> {
        self.texture_panels.keys().map(String::as_str)
    }

    /// Refit the preview size to a new viewport aspect ratio.
    pub fn set_viewport_size(&mut self, width: u32, height: u32) {
        if self.viewport == Some((width, height)) {
            return;
        }
        let Some(size) = fit_preview_size(width, height, self.preview_bounds) else {
            return;
        };
        self.viewport = Some((width, height));
        let resized = self.previews.resize(size, self.core.raster_context_mut());
        if resized {
            debug!(
                "Preview size is now {}x{} for a {width}x{height} viewport",
                size.width, size.height
            );
        }
    }

    pub fn preview_size(&self) -> PreviewSize {
        self.previews.size()
    }

    pub fn panel_state(&self, metric: Metric) -> &PanelState {
        &self.panels[metric]
    }

    pub fn refresh_rate(&self) -> Option<RefreshRate> {
        self.vsync.as_ref().and_then(VSyncEstimator::detected)
    }

    pub fn dropped_gpu_samples(&self) -> u64 {
        self.core.dropped_gpu_samples()
    }

    pub fn series(&self, metric: Metric) -> &MetricSeries {
        self.core.series(metric)
    }

    pub fn config(&self) -> &StatsConfig {
        self.core.config()
    }

    pub fn core(&self) -> &StatsCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut StatsCore {
        &mut self.core
    }

    /// Release GPU resources, forget texture panels and clear all history.
    /// Safe to call more than once.
    pub fn dispose(&mut self) {
        self.capture_task = None;
        self.previews.release(self.core.raster_context_mut());
        self.texture_panels.clear();
        self.pending_previews.clear();
        self.core.dispose();
        self.panels = MetricPanels::default();
        if let Some(vsync) = &mut self.vsync {
            vsync.clear();
        }
        self.external = None;
        self.has_new_external = false;
        self.viewport = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        stats_core::EngineCounters,
        testing::{FakeRaster, FakeRasterState},
    };
    use std::{cell::RefCell, rc::Rc};

    // Whole milliseconds keep the duty-cycle arithmetic exact.
    const FRAME_MS: f64 = 17.0;

    fn stats(config: StatsConfig) -> (ManualClock, Stats) {
        let clock = ManualClock::new(0.0);
        let stats = Stats::with_clock(config, Arc::new(clock.clone()));
        (clock, stats)
    }

    fn raster_stats(config: StatsConfig) -> (ManualClock, Stats, Rc<RefCell<FakeRasterState>>) {
        let (clock, mut stats) = stats(config);
        let (ctx, state) = FakeRaster::new();
        assert!(stats.init(Some(StatsTarget::Raster(Box::new(ctx)))));
        (clock, stats, state)
    }

    #[test]
    fn sixty_frames_drive_both_duty_cycles() {
        let (clock, mut stats) = stats(StatsConfig::default());
        let mut text_updates = 0;
        let mut graph_updates = 0;
        for _ in 0..60 {
            stats.begin();
            clock.advance(FRAME_MS);
            stats.end(None);
            let refresh = stats.update();
            text_updates += usize::from(refresh.text_due);
            graph_updates += usize::from(refresh.graph_due);
        }
        assert_eq!(text_updates, 4);
        assert_eq!(graph_updates, 30);
        assert_eq!(stats.data().fps, 59.0);
    }

    #[test]
    fn readouts_only_when_text_is_due() {
        let (clock, mut stats) = stats(StatsConfig::default());
        clock.advance(10.0);
        let quiet = stats.update();
        assert!(!quiet.text_due);
        assert!(quiet.text.is_empty());

        clock.advance(250.0);
        let refresh = stats.update();
        assert!(refresh.text_due);
        let metrics: Vec<_> = refresh.text.iter().map(|r| r.metric).collect();
        assert_eq!(metrics, vec![Metric::Fps, Metric::Cpu]);
        assert_eq!(refresh.text[0].precision, 0);
        assert_eq!(refresh.text[1].precision, 2);
    }

    #[test]
    fn smoothed_value_moves_towards_latest() {
        let (clock, mut stats) = stats(StatsConfig::default());
        stats.begin();
        clock.advance(10.0);
        stats.end(None);
        clock.advance(250.0);
        let refresh = stats.update();
        let cpu = refresh
            .text
            .iter()
            .find(|r| r.metric == Metric::Cpu)
            .expect("cpu readout");
        assert!((cpu.value - 3.0).abs() < 1e-9);
        assert_eq!(cpu.max, 10.0);
        assert_eq!(cpu.min, 10.0);
    }

    #[test]
    fn gpu_panels_follow_config() {
        let (_, plain) = stats(StatsConfig::default());
        assert!(!plain.visible_metrics().contains(&Metric::Gpu));

        let (_, gpu) = stats(StatsConfig {
            track_gpu: true,
            track_compute_gpu: true,
            track_frame_rate: false,
            ..Default::default()
        });
        assert_eq!(
            gpu.visible_metrics(),
            vec![Metric::Cpu, Metric::Gpu, Metric::GpuCompute]
        );
    }

    #[test]
    fn engine_timings_reach_the_graph() {
        let (clock, mut stats) = stats(StatsConfig {
            track_gpu: true,
            ..Default::default()
        });
        stats.init(Some(StatsTarget::Renderer(EngineCounters {
            render: true,
            compute: false,
        })));
        stats.report_engine_timings(Some(6.0), None);
        clock.advance(40.0);
        let refresh = stats.update();
        let gpu = refresh
            .graph
            .iter()
            .find(|s| s.metric == Metric::Gpu)
            .expect("gpu sample");
        assert_eq!(gpu.value, 6.0);
        assert_eq!(gpu.normalized(), 1.0);
    }

    #[test]
    fn set_data_switches_to_delegated_mode() {
        let (clock, mut stats) = stats(StatsConfig {
            track_gpu: true,
            ..Default::default()
        });
        let snapshot = StatsSnapshot {
            fps: 58.0,
            cpu: 4.0,
            gpu: 7.5,
            gpu_compute: 0.0,
        };
        stats.set_data(snapshot);
        assert!(stats.is_delegated());
        assert_eq!(stats.data(), snapshot);

        clock.advance(300.0);
        let refresh = stats.update();
        assert_eq!(stats.series(Metric::WorkerCpu).latest(), 4.0);
        assert_eq!(stats.series(Metric::Gpu).latest(), 7.5);
        assert_eq!(stats.series(Metric::Fps).latest(), 58.0);
        assert_eq!(stats.series(Metric::Fps).len(), 1);

        let labels: Vec<_> = refresh.text.iter().map(|r| (r.metric, r.worker)).collect();
        assert_eq!(
            labels,
            vec![
                (Metric::Fps, true),
                (Metric::Cpu, false),
                (Metric::WorkerCpu, true),
                (Metric::Gpu, true),
            ]
        );

        // A snapshot is consumed once; the local CPU series keeps growing.
        stats.update();
        assert_eq!(stats.series(Metric::WorkerCpu).len(), 1);
        assert_eq!(stats.series(Metric::Cpu).len(), 2);
    }

    #[test]
    fn raster_previews_refresh_on_graph_cycle() {
        let (clock, mut stats, state) = raster_stats(StatsConfig::default());
        let source = state
            .borrow_mut()
            .add_source(160, 90, |_, _| [10, 200, 30, 255]);
        stats.add_texture_panel("scene");
        stats.set_viewport_size(160, 90);
        stats.set_texture_framebuffer("scene", source, 160, 90);

        clock.advance(10.0);
        assert!(stats.update().previews_updated.is_empty());

        clock.advance(40.0);
        let refresh = stats.update();
        assert_eq!(refresh.previews_updated, vec!["scene".to_owned()]);
        let panel = stats.texture_panel("scene").expect("panel");
        assert_eq!(panel.source_size(), Some((160, 90)));
        let bitmap = panel.bitmap().expect("bitmap");
        assert_eq!((bitmap.width(), bitmap.height()), (85, 48));
        assert_eq!(bitmap.pixel(0, 0), [10, 200, 30, 255]);
    }

    #[test]
    fn mismatched_sources_are_ignored() {
        let (_, mut stats) = stats(StatsConfig::default());
        stats.add_texture_panel("scene");
        stats.set_texture_framebuffer("scene", FramebufferHandle(1), 64, 64);
        assert!(stats
            .texture_panel("scene")
            .is_some_and(|p| p.source().is_none()));
    }

    #[test]
    fn unknown_panels_are_ignored() {
        let (_, mut stats, state) = raster_stats(StatsConfig::default());
        let source = state.borrow_mut().add_source(8, 8, |_, _| [0; 4]);
        stats.set_texture_framebuffer("missing", source, 8, 8);
        assert_eq!(stats.texture_panel_names().count(), 0);
    }

    #[test]
    fn external_bitmaps_are_reported_once() {
        let (_, mut stats) = stats(StatsConfig::default());
        stats.add_texture_panel("worker");
        let bitmap = PreviewBitmap::from_rgba(2, 1, vec![255; 8]).expect("bitmap");
        stats.set_texture_bitmap("worker", bitmap, Some((200, 100)));

        assert_eq!(stats.update().previews_updated, vec!["worker".to_owned()]);
        assert!(stats.update().previews_updated.is_empty());
        assert_eq!(
            stats.texture_panel("worker").and_then(|p| p.source_size()),
            Some((200, 100))
        );
    }

    #[test]
    fn viewport_changes_refit_the_preview() {
        let (_, mut stats) = stats(StatsConfig::default());
        assert_eq!(stats.preview_size(), PreviewSize::new(90, 48));
        stats.set_viewport_size(1080, 1920);
        assert_eq!(stats.preview_size(), PreviewSize::new(27, 48));
        stats.set_viewport_size(0, 1920);
        assert_eq!(stats.preview_size(), PreviewSize::new(27, 48));
    }

    #[test]
    fn refresh_rate_is_detected_at_sixty_hertz() {
        let (clock, mut stats) = stats(StatsConfig {
            track_refresh_rate: true,
            ..Default::default()
        });
        let mut last = None;
        for _ in 0..80 {
            clock.advance(16.0);
            last = stats.update().refresh_rate;
        }
        assert_eq!(last.map(|r| r.hz), Some(60));
        assert_eq!(stats.refresh_rate().map(|r| r.hz), Some(60));
    }

    #[test]
    fn dispose_twice_is_safe() {
        let (clock, mut stats, state) = raster_stats(StatsConfig {
            track_gpu: true,
            ..Default::default()
        });
        let source = state.borrow_mut().add_source(8, 8, |_, _| [0; 4]);
        stats.add_texture_panel("scene");
        stats.set_texture_framebuffer("scene", source, 8, 8);
        stats.begin();
        stats.end(None);
        clock.advance(50.0);
        stats.update();

        stats.dispose();
        stats.dispose();
        assert_eq!(stats.data(), StatsSnapshot::default());
        assert_eq!(stats.texture_panel_names().count(), 0);
        assert_eq!(state.borrow().live_queries(), 0);
        let state = state.borrow();
        assert_eq!(state.targets_created, state.targets_deleted);
    }
}
