//! Channel carrying snapshots and preview bitmaps from a [`StatsProfiler`]
//! to a displaying [`Stats`].
//!
//! [`StatsProfiler`]: crate::StatsProfiler

use bevy::{log::debug, prelude::Resource};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::{
    capture::PreviewBitmap, constants::DEFAULT_FEED_CAPACITY, stats::Stats,
    stats_core::StatsSnapshot,
};

#[derive(Debug, Clone)]
pub enum FeedMessage {
    Snapshot(StatsSnapshot),
    Texture {
        name: String,
        bitmap: PreviewBitmap,
        /// Size of the captured source
        width: u32,
        height: u32,
    },
}

/// Producer half. Cheap to clone, usable from any thread.
#[derive(Debug, Clone)]
pub struct StatsFeedSender {
    tx: Sender<FeedMessage>,
}

/// Consumer half, drained once per frame by the plugin.
#[derive(Debug, Resource)]
pub struct StatsFeed {
    rx: Receiver<FeedMessage>,
}

pub fn stats_feed() -> (StatsFeedSender, StatsFeed) {
    stats_feed_with_capacity(DEFAULT_FEED_CAPACITY)
}

pub fn stats_feed_with_capacity(capacity: usize) -> (StatsFeedSender, StatsFeed) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (StatsFeedSender { tx }, StatsFeed { rx })
}

impl StatsFeedSender {
    /// Returns `false` once the display side is gone. A full channel drops
    /// the message, since the next frame sends a fresher one.
    pub fn send(&self, message: FeedMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Stats feed is full; message dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn send_snapshot(&self, snapshot: StatsSnapshot) -> bool {
        self.send(FeedMessage::Snapshot(snapshot))
    }

    pub fn send_texture(
        &self,
        name: impl Into<String>,
        bitmap: PreviewBitmap,
        source_size: (u32, u32),
    ) -> bool {
        self.send(FeedMessage::Texture {
            name: name.into(),
            bitmap,
            width: source_size.0,
            height: source_size.1,
        })
    }
}

impl StatsFeed {
    /// Apply every queued message to `stats`. Returns how many were applied.
    ///
    /// Bitmaps for unknown panel names register the panel first.
    pub fn drain_into(&self, stats: &mut Stats) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.rx.try_recv() {
            match message {
                FeedMessage::Snapshot(snapshot) => stats.set_data(snapshot),
                FeedMessage::Texture {
                    name,
                    bitmap,
                    width,
                    height,
                } => {
                    if stats.texture_panel(&name).is_none() {
                        stats.add_texture_panel(name.as_str());
                    }
                    stats.set_texture_bitmap(&name, bitmap, Some((width, height)));
                }
            }
            applied += 1;
        }
        applied
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
