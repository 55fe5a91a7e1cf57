//! Frame statistics for Bevy apps: CPU phase time, GPU pass time, frame rate,
//! display refresh rate and live render-target previews.
//!
//! [`Stats`] is the monitor itself and works without an `App`: call
//! [`Stats::begin`] and [`Stats::end`] around a frame and [`Stats::update`]
//! once per frame. [`StatsPlugin`] does that from Bevy's schedules and draws
//! the result as a UI overlay.
//!
//! GPU time comes from one of four sources picked with [`StatsTarget`]:
//! engine-reported pass timings, wgpu timestamp queries, another
//! [`TimestampDevice`], or GL-style timer queries through [`RasterContext`].
//!
//! For renderers on another thread or process, run a [`StatsProfiler`] next
//! to the renderer and ship its snapshots to the displaying [`Stats`] through
//! [`stats_feed`].

mod capture;
mod clock;
mod config;
pub mod constants;
mod cpu_timer;
mod error;
mod feed;
mod fps;
mod gpu;
pub mod hud;
mod panel;
mod plugin;
mod profiler;
mod raster;
mod series;
mod stats;
mod stats_core;
mod vsync;

#[cfg(test)]
mod testing;

pub use capture::{
    fit_preview_size, flip_rows, letterbox, padded_bytes_per_row, unpad_rows, CaptureJob,
    Letterbox, PreviewBitmap, PreviewCapture, PreviewSize, RasterTextureCapture,
    RenderTargetSource, TextureSource, WgpuTextureCapture,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HudSettings, StatsConfig};
pub use cpu_timer::CpuPhaseTimer;
pub use error::StatsError;
pub use feed::{stats_feed, stats_feed_with_capacity, FeedMessage, StatsFeed, StatsFeedSender};
pub use fps::FrameRateCounter;
pub use gpu::{
    BufferMapState, RasterGpuTimer, SharedResolve, TimestampDevice, TimestampGpuTimer,
    WgpuTimestamps,
};
pub use panel::{GraphSample, Metric, MetricPanels, PanelReadout, PanelState};
pub use plugin::{GpuDiagnosticsSource, LastStatsRefresh, StatsPlugin};
pub use profiler::StatsProfiler;
pub use raster::{
    ColorTarget, FramebufferBindings, FramebufferHandle, QueryHandle, RasterContext,
    TextureHandle,
};
pub use series::MetricSeries;
pub use stats::{Stats, StatsRefresh, TexturePanel};
pub use stats_core::{EngineCounters, StatsCore, StatsSnapshot, StatsTarget};
pub use vsync::{RefreshRate, VSyncEstimator, REFRESH_RATES};
