//! Configuration structures for bevy_frame_stats.
//!
//! [`StatsConfig`] drives the measurement core and its duty cycles.
//! [`HudSettings`] only affects the Bevy overlay.

use crate::constants::*;
use bevy::{color::Color, log::warn, math::Vec2, prelude::Resource};

/// Options recognized by [`crate::Stats`] and [`crate::StatsProfiler`].
///
/// # Example
/// ```rust
/// use bevy_frame_stats::StatsConfig;
///
/// let config = StatsConfig {
///     track_gpu: true,
///     graph_refresh_hz: 60.0,
///     ..Default::default()
/// };
/// assert_eq!(config.recent_window_size, 40);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StatsConfig {
    /// Time GPU render work (timer queries or timestamp queries)
    pub track_gpu: bool,
    /// Time GPU compute work reported by the engine
    pub track_compute_gpu: bool,
    /// Infer the display refresh rate from frame intervals
    pub track_refresh_rate: bool,
    /// Count frames in a trailing one-second window
    pub track_frame_rate: bool,
    /// Rate at which numeric readouts are recomputed
    pub text_refresh_hz: f64,
    /// Rate at which sparklines and texture previews are refreshed
    pub graph_refresh_hz: f64,
    /// Samples kept for readouts and max tracking
    pub recent_window_size: usize,
    /// Samples kept for the sparkline
    pub graph_window_size: usize,
    /// Decimals shown for millisecond readouts
    pub display_precision: usize,
    /// Largest preview size before aspect correction, in pixels
    pub preview_size: (u32, u32),
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            track_gpu: false,
            track_compute_gpu: false,
            track_refresh_rate: false,
            track_frame_rate: true,
            text_refresh_hz: DEFAULT_TEXT_REFRESH_HZ,
            graph_refresh_hz: DEFAULT_GRAPH_REFRESH_HZ,
            recent_window_size: DEFAULT_RECENT_WINDOW,
            graph_window_size: DEFAULT_GRAPH_WINDOW,
            display_precision: DEFAULT_PRECISION,
            preview_size: (DEFAULT_PREVIEW_WIDTH, DEFAULT_PREVIEW_HEIGHT),
        }
    }
}

impl StatsConfig {
    /// Return a copy with unusable values replaced by defaults.
    ///
    /// Non-positive or non-finite rates fall back to the default rates, empty
    /// windows grow to one sample, the graph window is clamped to the recent
    /// window and the preview size is kept at or above the minimum edge.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        if !(out.text_refresh_hz.is_finite() && out.text_refresh_hz > 0.0) {
            warn!(
                "text_refresh_hz {} is not usable, using {}",
                out.text_refresh_hz, DEFAULT_TEXT_REFRESH_HZ
            );
            out.text_refresh_hz = DEFAULT_TEXT_REFRESH_HZ;
        }
        if !(out.graph_refresh_hz.is_finite() && out.graph_refresh_hz > 0.0) {
            warn!(
                "graph_refresh_hz {} is not usable, using {}",
                out.graph_refresh_hz, DEFAULT_GRAPH_REFRESH_HZ
            );
            out.graph_refresh_hz = DEFAULT_GRAPH_REFRESH_HZ;
        }
        if out.recent_window_size == 0 {
            warn!("recent_window_size must hold at least one sample");
            out.recent_window_size = 1;
        }
        if out.graph_window_size == 0 || out.graph_window_size > out.recent_window_size {
            let clamped = out.graph_window_size.clamp(1, out.recent_window_size);
            warn!(
                "graph_window_size {} clamped to {}",
                out.graph_window_size, clamped
            );
            out.graph_window_size = clamped;
        }
        out.preview_size = (
            out.preview_size.0.max(MIN_PREVIEW_EDGE),
            out.preview_size.1.max(MIN_PREVIEW_EDGE),
        );
        out
    }

    /// Milliseconds between two text refreshes.
    pub fn text_interval_ms(&self) -> f64 {
        1000.0 / self.text_refresh_hz
    }

    /// Milliseconds between two graph refreshes.
    pub fn graph_interval_ms(&self) -> f64 {
        1000.0 / self.graph_refresh_hz
    }
}

/// Layout of the Bevy overlay spawned by [`crate::StatsPlugin`].
///
/// Insert this resource before adding the plugin to move or restyle the HUD.
#[derive(Debug, Clone, Resource)]
pub struct HudSettings {
    /// Screen position (in pixels) of the top-left corner
    pub origin: Vec2,
    /// Width of the label + readout column
    pub text_width: f32,
    /// Size of each sparkline
    pub graph_size: Vec2,
    /// Gap between sparkline bars
    pub bar_gap: f32,
    /// Vertical gap between metric rows
    pub row_gap: f32,
    /// Font size for readouts
    pub font_size: f32,
    /// Box each texture preview is letterboxed into
    pub preview_size: Vec2,
    /// Panel background
    pub background: Color,
    /// Spawn a UI camera for the overlay. Turn off when the app already has one.
    pub spawn_camera: bool,
    /// Lay metric rows out side by side instead of stacked
    pub horizontal: bool,
    /// Show a single panel; clicking the overlay cycles to the next one
    pub minimal: bool,
    /// Panel shown first in minimal mode, as an index into the visible panels
    pub mode: usize,
}

impl Default for HudSettings {
    fn default() -> Self {
        Self {
            origin: Vec2::new(16.0, 16.0),
            text_width: 150.0,
            graph_size: Vec2::new(90.0, 28.0),
            bar_gap: 1.0,
            row_gap: 3.0,
            font_size: 11.0,
            preview_size: Vec2::new(90.0, 48.0),
            background: Color::srgba(0.0, 0.0, 0.0, 0.75),
            spawn_camera: true,
            horizontal: false,
            minimal: false,
            mode: 0,
        }
    }
}
