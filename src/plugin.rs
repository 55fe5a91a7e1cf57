//! Bevy integration for [`Stats`].
//!
//! This module contains [`StatsPlugin`] and the systems that drive the
//! monitor once per frame.

use std::sync::Arc;

use bevy::{
    app::{App, First, Last, Plugin, PreUpdate, Startup},
    diagnostic::{DiagnosticPath, DiagnosticsStore},
    ecs::system::{NonSendMut, Query, Res, ResMut},
    prelude::{IntoScheduleConfigs, Resource, With},
    window::{PrimaryWindow, Window},
};

use crate::{
    clock::{Clock, SystemClock},
    config::{HudSettings, StatsConfig},
    feed::StatsFeed,
    hud,
    stats::{Stats, StatsRefresh},
    stats_core::{EngineCounters, StatsTarget},
};

/// Adds a [`Stats`] monitor to the app and, optionally, its overlay.
///
/// `Stats` is stored as a non-send resource: it may own a thread-bound
/// rendering context. Systems can reach it with `NonSend<Stats>` /
/// `NonSendMut<Stats>`, for example to call [`Stats::init`] with a render
/// target or to register texture panels.
///
/// # Example
///
/// ```no_run
/// use bevy::prelude::*;
/// use bevy_frame_stats::{StatsConfig, StatsPlugin};
///
/// let mut app = App::new();
/// app.add_plugins(DefaultPlugins);
/// app.add_plugins(StatsPlugin {
///     config: StatsConfig {
///         track_refresh_rate: true,
///         ..Default::default()
///     },
///     ..Default::default()
/// });
/// app.run();
/// ```
pub struct StatsPlugin {
    pub config: StatsConfig,
    /// Spawn the UI overlay
    pub hud: bool,
    /// Time source, the monotonic system clock when `None`
    pub clock: Option<Arc<dyn Clock>>,
    /// Read GPU timings from these diagnostics instead of querying the GPU
    pub gpu_diagnostics: Option<GpuDiagnosticsSource>,
}

impl Default for StatsPlugin {
    fn default() -> Self {
        Self {
            config: StatsConfig::default(),
            hud: true,
            clock: None,
            gpu_diagnostics: None,
        }
    }
}

/// Diagnostics holding GPU pass timings in milliseconds, such as the
/// `elapsed_gpu` paths published by Bevy's `RenderDiagnosticsPlugin`.
#[derive(Debug, Clone, Default, Resource)]
pub struct GpuDiagnosticsSource {
    pub render: Option<DiagnosticPath>,
    pub compute: Option<DiagnosticPath>,
}

/// Result of the most recent [`Stats::update`].
#[derive(Debug, Clone, Default, Resource)]
pub struct LastStatsRefresh(pub StatsRefresh);

impl Plugin for StatsPlugin {
    fn build(&self, app: &mut App) {
        let clock = self
            .clock
            .clone()
            .unwrap_or_else(|| Arc::new(SystemClock::default()));
        let mut stats = Stats::with_clock(self.config.clone(), clock);

        if let Some(source) = &self.gpu_diagnostics {
            stats.init(Some(StatsTarget::Renderer(EngineCounters {
                render: source.render.is_some(),
                compute: source.compute.is_some(),
            })));
            app.insert_resource(source.clone());
        }

        app.insert_non_send_resource(stats)
            .init_resource::<LastStatsRefresh>()
            .add_systems(First, begin_frame)
            .add_systems(
                PreUpdate,
                (drain_feed, sync_viewport_size, report_gpu_diagnostics),
            )
            .add_systems(Last, end_frame);

        if self.hud {
            if !app.world().contains_resource::<HudSettings>() {
                app.init_resource::<HudSettings>();
            }
            app.add_systems(Startup, hud::spawn_hud).add_systems(
                Last,
                (
                    hud::cycle_minimal_panel,
                    hud::sync_panel_rows,
                    hud::apply_panel_text,
                    hud::apply_graph_bars,
                    hud::sync_texture_previews,
                )
                    .chain()
                    .after(end_frame),
            );
        }
    }
}

fn begin_frame(mut stats: NonSendMut<Stats>) {
    stats.begin();
}

fn drain_feed(feed: Option<Res<StatsFeed>>, mut stats: NonSendMut<Stats>) {
    if let Some(feed) = feed {
        feed.drain_into(&mut stats);
    }
}

fn sync_viewport_size(
    windows: Query<&Window, With<PrimaryWindow>>,
    mut stats: NonSendMut<Stats>,
) {
    if let Ok(window) = windows.single() {
        stats.set_viewport_size(window.physical_width(), window.physical_height());
    }
}

fn report_gpu_diagnostics(
    source: Option<Res<GpuDiagnosticsSource>>,
    diagnostics: Option<Res<DiagnosticsStore>>,
    mut stats: NonSendMut<Stats>,
) {
    let (Some(source), Some(diagnostics)) = (source, diagnostics) else {
        return;
    };
    let read = |path: &Option<DiagnosticPath>| {
        path.as_ref()
            .and_then(|path| diagnostics.get(path))
            .and_then(|diagnostic| diagnostic.value())
    };
    stats.report_engine_timings(read(&source.render), read(&source.compute));
}

fn end_frame(mut stats: NonSendMut<Stats>, mut last: ResMut<LastStatsRefresh>) {
    stats.end(None);
    last.0 = stats.update();
}
