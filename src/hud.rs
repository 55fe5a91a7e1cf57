//! UI overlay for [`Stats`].
//!
//! One row per metric (readout text plus a bar sparkline), an optional
//! refresh-rate label and a column of texture previews. Rows are spawned for
//! every metric up front and shown or hidden as panels come and go.

use bevy::{
    asset::{Assets, RenderAssetUsages},
    ecs::{
        entity::Entity,
        system::{Commands, NonSend, Query, Res},
    },
    image::Image,
    prelude::*,
    render::render_resource::{Extent3d, TextureDimension, TextureFormat},
    text::{TextColor, TextFont},
    ui::{AlignItems, BackgroundColor, Display, FlexDirection, Node, PositionType, UiRect, Val},
};

use crate::{
    capture::{letterbox, PreviewBitmap},
    config::HudSettings,
    panel::Metric,
    plugin::LastStatsRefresh,
    stats::Stats,
};

/// Root node of the overlay.
#[derive(Component)]
pub struct StatsHudRoot;

/// Index of the panel shown in minimal mode, into [`Stats::visible_metrics`].
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinimalPanel(pub usize);

/// Row holding one metric's readout and sparkline.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelRow(pub Metric);

#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelText(pub Metric);

/// One bar of a sparkline. `slot` 0 is the oldest sample.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphBar {
    pub metric: Metric,
    pub slot: usize,
}

#[derive(Component)]
pub struct RefreshRateText;

/// Container the texture previews are spawned into.
#[derive(Component)]
pub struct TexturePanelsRoot;

/// Labelled frame holding one texture panel's preview.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct TexturePanelFrame(pub String);

/// Image node showing the texture panel with this name.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct TexturePanelImage(pub String);

/// Startup system: build the overlay hierarchy.
pub fn spawn_hud(mut commands: Commands, settings: Res<HudSettings>, stats: NonSend<Stats>) {
    commands.insert_resource(MinimalPanel(settings.mode));
    if settings.spawn_camera {
        commands.spawn((
            Camera2d,
            Camera {
                order: 1,
                ..default()
            },
        ));
    }

    let root = commands
        .spawn((
            StatsHudRoot,
            Node {
                position_type: PositionType::Absolute,
                left: Val::Px(settings.origin.x),
                top: Val::Px(settings.origin.y),
                flex_direction: if settings.horizontal {
                    FlexDirection::Row
                } else {
                    FlexDirection::Column
                },
                row_gap: Val::Px(settings.row_gap),
                column_gap: Val::Px(settings.row_gap),
                padding: UiRect::all(Val::Px(4.0)),
                ..default()
            },
            BackgroundColor(settings.background),
        ))
        .id();
    if settings.minimal {
        commands.entity(root).insert(Interaction::default());
    }

    let visible = shown_metrics(&stats.visible_metrics(), &settings, settings.mode);
    let bar_count = stats.config().graph_window_size;
    for metric in Metric::ALL {
        spawn_metric_row(
            &mut commands,
            root,
            &settings,
            metric,
            bar_count,
            visible.contains(&metric),
        );
    }

    if stats.config().track_refresh_rate {
        commands.spawn((
            RefreshRateText,
            Text::new(""),
            TextColor(Color::WHITE),
            text_font(&settings),
            ChildOf(root),
        ));
    }

    commands.spawn((
        TexturePanelsRoot,
        Node {
            flex_direction: FlexDirection::Column,
            row_gap: Val::Px(settings.row_gap),
            ..default()
        },
        ChildOf(root),
    ));
}

fn spawn_metric_row(
    commands: &mut Commands,
    root: Entity,
    settings: &HudSettings,
    metric: Metric,
    bar_count: usize,
    visible: bool,
) {
    let row = commands
        .spawn((
            PanelRow(metric),
            Node {
                display: if visible { Display::Flex } else { Display::None },
                flex_direction: FlexDirection::Row,
                align_items: AlignItems::Center,
                ..default()
            },
            BackgroundColor(metric.background()),
            ChildOf(root),
        ))
        .id();

    commands.spawn((
        PanelText(metric),
        Text::new(metric.label()),
        TextColor(metric.color()),
        text_font(settings),
        Node {
            width: Val::Px(settings.text_width),
            ..default()
        },
        ChildOf(row),
    ));

    let graph = commands
        .spawn((
            Node {
                width: Val::Px(settings.graph_size.x),
                height: Val::Px(settings.graph_size.y),
                flex_direction: FlexDirection::Row,
                align_items: AlignItems::FlexEnd,
                column_gap: Val::Px(settings.bar_gap),
                ..default()
            },
            ChildOf(row),
        ))
        .id();

    let bar_count = bar_count.max(1);
    let gaps = settings.bar_gap * (bar_count - 1) as f32;
    let bar_width = ((settings.graph_size.x - gaps) / bar_count as f32).max(1.0);
    for slot in 0..bar_count {
        commands.spawn((
            GraphBar { metric, slot },
            Node {
                width: Val::Px(bar_width),
                height: Val::Percent(0.0),
                ..default()
            },
            BackgroundColor(metric.color()),
            ChildOf(graph),
        ));
    }
}

fn text_font(settings: &HudSettings) -> TextFont {
    TextFont {
        font_size: settings.font_size,
        ..default()
    }
}

/// Metrics whose rows are displayed: every visible one, or in minimal mode
/// only the one at `mode`.
pub fn shown_metrics(visible: &[Metric], settings: &HudSettings, mode: usize) -> Vec<Metric> {
    if !settings.minimal || visible.is_empty() {
        return visible.to_vec();
    }
    vec![visible[mode % visible.len()]]
}

/// Advance the minimal-mode panel when the overlay is clicked.
pub fn cycle_minimal_panel(
    settings: Res<HudSettings>,
    panel: Option<ResMut<MinimalPanel>>,
    roots: Query<&Interaction, (Changed<Interaction>, With<StatsHudRoot>)>,
) {
    let (true, Some(mut panel)) = (settings.minimal, panel) else {
        return;
    };
    if roots.iter().any(|i| *i == Interaction::Pressed) {
        panel.0 = panel.0.wrapping_add(1);
    }
}

/// Show rows for the metrics that currently have a panel.
pub fn sync_panel_rows(
    stats: NonSend<Stats>,
    settings: Res<HudSettings>,
    panel: Option<Res<MinimalPanel>>,
    mut rows: Query<(&PanelRow, &mut Node)>,
) {
    let mode = panel.map_or(settings.mode, |p| p.0);
    let visible = shown_metrics(&stats.visible_metrics(), &settings, mode);
    for (row, mut node) in rows.iter_mut() {
        let display = if visible.contains(&row.0) {
            Display::Flex
        } else {
            Display::None
        };
        if node.display != display {
            node.display = display;
        }
    }
}

/// Write the latest readouts and refresh rate when the text cycle elapsed.
pub fn apply_panel_text(
    last: Res<LastStatsRefresh>,
    mut texts: Query<(&PanelText, &mut Text)>,
    mut refresh_label: Query<&mut Text, (With<RefreshRateText>, Without<PanelText>)>,
) {
    let refresh = &last.0;
    if !refresh.text_due {
        return;
    }
    for (panel, mut text) in texts.iter_mut() {
        if let Some(readout) = refresh.text.iter().find(|r| r.metric == panel.0) {
            text.0 = readout.format();
        }
    }
    if let (Some(rate), Ok(mut text)) = (refresh.refresh_rate, refresh_label.single_mut()) {
        text.0 = format!("{}Hz {:.2}ms", rate.hz, rate.frame_time_ms);
    }
}

/// Redraw the sparklines from the graph windows when the graph cycle elapsed.
pub fn apply_graph_bars(
    stats: NonSend<Stats>,
    last: Res<LastStatsRefresh>,
    mut bars: Query<(&GraphBar, &mut Node)>,
) {
    let refresh = &last.0;
    if !refresh.graph_due {
        return;
    }
    for sample in &refresh.graph {
        let series = stats.series(sample.metric);
        let values: Vec<f64> = series.graph().collect();
        let capacity = series.graph_capacity();
        // Newest sample on the right; empty slots on the left.
        let offset = capacity.saturating_sub(values.len());
        for (bar, mut node) in bars.iter_mut().filter(|(b, _)| b.metric == sample.metric) {
            let value = bar
                .slot
                .checked_sub(offset)
                .and_then(|i| values.get(i))
                .copied()
                .unwrap_or(0.0);
            node.height = Val::Percent(bar_height_percent(value, sample.graph_max));
        }
    }
}

fn bar_height_percent(value: f64, max: f64) -> f32 {
    if max <= 0.0 {
        return 0.0;
    }
    ((value / max).clamp(0.0, 1.0) * 100.0) as f32
}

/// Upload changed preview bitmaps, spawn image nodes for new panels and
/// despawn the nodes of removed ones.
pub fn sync_texture_previews(
    mut commands: Commands,
    stats: NonSend<Stats>,
    last: Res<LastStatsRefresh>,
    settings: Res<HudSettings>,
    images: Option<ResMut<Assets<Image>>>,
    roots: Query<Entity, With<TexturePanelsRoot>>,
    frames: Query<(Entity, &TexturePanelFrame)>,
    mut nodes: Query<(&TexturePanelImage, &ImageNode, &mut Node)>,
) {
    let Some(mut images) = images else {
        return;
    };
    for (frame, panel) in frames.iter() {
        if stats.texture_panel(&panel.0).is_some() {
            continue;
        }
        for (_, image_node, _) in nodes.iter().filter(|(p, ..)| p.0 == panel.0) {
            images.remove(&image_node.image);
        }
        commands.entity(frame).despawn();
    }

    let Ok(root) = roots.single() else {
        return;
    };
    for name in &last.0.previews_updated {
        let Some(panel) = stats.texture_panel(name) else {
            continue;
        };
        let Some(bitmap) = panel.bitmap() else {
            continue;
        };
        let (source_w, source_h) = panel
            .source_size()
            .unwrap_or((bitmap.width(), bitmap.height()));
        let placement = letterbox(
            source_w as f32 / source_h.max(1) as f32,
            (settings.preview_size.x, settings.preview_size.y),
        );
        let image = preview_image(bitmap);

        if let Some((_, image_node, mut node)) = nodes.iter_mut().find(|(p, ..)| &p.0 == name) {
            if let Some(existing) = images.get_mut(&image_node.image) {
                *existing = image;
            }
            node.left = Val::Px(placement.x);
            node.top = Val::Px(placement.y);
            node.width = Val::Px(placement.width);
            node.height = Val::Px(placement.height);
            continue;
        }

        let frame = commands
            .spawn((
                TexturePanelFrame(name.clone()),
                Node {
                    flex_direction: FlexDirection::Column,
                    ..default()
                },
                ChildOf(root),
            ))
            .id();
        commands.spawn((
            Text::new(name.clone()),
            TextColor(Color::WHITE),
            text_font(&settings),
            ChildOf(frame),
        ));
        let frame_box = commands
            .spawn((
                Node {
                    width: Val::Px(settings.preview_size.x),
                    height: Val::Px(settings.preview_size.y),
                    ..default()
                },
                BackgroundColor(Color::BLACK),
                ChildOf(frame),
            ))
            .id();
        commands.spawn((
            TexturePanelImage(name.clone()),
            ImageNode::new(images.add(image)),
            Node {
                position_type: PositionType::Absolute,
                left: Val::Px(placement.x),
                top: Val::Px(placement.y),
                width: Val::Px(placement.width),
                height: Val::Px(placement.height),
                ..default()
            },
            ChildOf(frame_box),
        ));
    }
}

/// Convert a preview into a UI image.
pub fn preview_image(bitmap: &PreviewBitmap) -> Image {
    Image::new(
        Extent3d {
            width: bitmap.width(),
            height: bitmap.height(),
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        bitmap.as_raw().to_vec(),
        TextureFormat::Rgba8UnormSrgb,
        RenderAssetUsages::MAIN_WORLD | RenderAssetUsages::RENDER_WORLD,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{clock::ManualClock, plugin::StatsPlugin};

    fn preview_app(clock: &ManualClock) -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.insert_resource(HudSettings {
            spawn_camera: false,
            ..Default::default()
        });
        app.init_resource::<Assets<Image>>();
        app.add_plugins(StatsPlugin {
            clock: Some(Arc::new(clock.clone())),
            ..Default::default()
        });
        app
    }

    fn preview_names(app: &mut App) -> Vec<String> {
        let mut images = app.world_mut().query::<&TexturePanelImage>();
        images.iter(app.world()).map(|p| p.0.clone()).collect()
    }

    #[test]
    fn minimal_mode_shows_one_panel_at_a_time() {
        let visible = [Metric::Fps, Metric::Cpu, Metric::Gpu];
        let full = HudSettings::default();
        assert_eq!(shown_metrics(&visible, &full, 1), visible.to_vec());

        let minimal = HudSettings {
            minimal: true,
            ..Default::default()
        };
        assert_eq!(shown_metrics(&visible, &minimal, 0), vec![Metric::Fps]);
        assert_eq!(shown_metrics(&visible, &minimal, 4), vec![Metric::Cpu]);
        assert!(shown_metrics(&[], &minimal, 2).is_empty());
    }

    #[test]
    fn clicking_the_overlay_cycles_panels() {
        let clock = ManualClock::new(0.0);
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.insert_resource(HudSettings {
            spawn_camera: false,
            minimal: true,
            ..Default::default()
        });
        app.add_plugins(StatsPlugin {
            clock: Some(Arc::new(clock.clone())),
            ..Default::default()
        });
        app.update();

        let shown = |app: &mut App| {
            let mut rows = app.world_mut().query::<(&PanelRow, &Node)>();
            rows.iter(app.world())
                .filter(|(_, node)| node.display == Display::Flex)
                .map(|(row, _)| row.0)
                .collect::<Vec<_>>()
        };
        assert_eq!(shown(&mut app), vec![Metric::Fps]);

        let mut roots = app
            .world_mut()
            .query_filtered::<&mut Interaction, With<StatsHudRoot>>();
        for mut interaction in roots.iter_mut(app.world_mut()) {
            *interaction = Interaction::Pressed;
        }
        clock.advance(17.0);
        app.update();
        assert_eq!(app.world().resource::<MinimalPanel>().0, 1);
        assert_eq!(shown(&mut app), vec![Metric::Cpu]);
    }

    #[test]
    fn removed_panels_lose_their_preview() {
        let clock = ManualClock::new(0.0);
        let mut app = preview_app(&clock);
        {
            let mut stats = app.world_mut().non_send_resource_mut::<Stats>();
            stats.add_texture_panel("shadow");
            let bitmap = PreviewBitmap::from_rgba(1, 1, vec![0, 0, 0, 255]).expect("bitmap");
            stats.set_texture_bitmap("shadow", bitmap, None);
        }
        clock.advance(17.0);
        app.update();
        assert_eq!(preview_names(&mut app), vec!["shadow".to_string()]);
        assert_eq!(app.world().resource::<Assets<Image>>().len(), 1);

        app.world_mut()
            .non_send_resource_mut::<Stats>()
            .remove_texture_panel("shadow");
        clock.advance(17.0);
        app.update();
        assert!(preview_names(&mut app).is_empty());
        assert_eq!(app.world().resource::<Assets<Image>>().len(), 0);
        let mut frames = app.world_mut().query::<&TexturePanelFrame>();
        assert_eq!(frames.iter(app.world()).count(), 0);
    }

    #[test]
    fn bar_heights_are_clamped_percentages() {
        assert_eq!(bar_height_percent(5.0, 10.0), 50.0);
        assert_eq!(bar_height_percent(20.0, 10.0), 100.0);
        assert_eq!(bar_height_percent(3.0, 0.0), 0.0);
    }

    #[test]
    fn preview_image_keeps_pixels() {
        let bitmap = PreviewBitmap::from_rgba(2, 1, vec![1, 2, 3, 4, 5, 6, 7, 8]).expect("bitmap");
        let image = preview_image(&bitmap);
        assert_eq!(image.width(), 2);
        assert_eq!(image.height(), 1);
        assert_eq!(image.data.as_deref(), Some(&[1, 2, 3, 4, 5, 6, 7, 8][..]));
    }
}
