//! Constants used throughout the bevy_frame_stats crate.
//!
//! This module centralizes default window sizes, duty-cycle rates,
//! estimator thresholds and the timeline labels used by the CPU timer.

/// Default number of samples kept for numeric readouts (max tracking)
pub const DEFAULT_RECENT_WINDOW: usize = 40;

/// Default number of samples kept for sparkline rendering
pub const DEFAULT_GRAPH_WINDOW: usize = 10;

/// Default text refresh rate in Hz
pub const DEFAULT_TEXT_REFRESH_HZ: f64 = 4.0;

/// Default graph refresh rate in Hz
pub const DEFAULT_GRAPH_REFRESH_HZ: f64 = 30.0;

/// Default number of decimals shown for millisecond readouts
pub const DEFAULT_PRECISION: usize = 2;

/// Default texture preview width in pixels
pub const DEFAULT_PREVIEW_WIDTH: u32 = 90;

/// Default texture preview height in pixels
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 48;

/// Smallest preview edge after aspect correction
pub const MIN_PREVIEW_EDGE: u32 = 16;

/// Length of the trailing window counted by the frame-rate counter
pub const FPS_WINDOW_MS: f64 = 1000.0;

/// Number of frame intervals kept by the vsync estimator
pub const VSYNC_HISTORY_SIZE: usize = 120;

/// Number of intervals needed before the vsync estimator reports anything
pub const VSYNC_MIN_SAMPLES: usize = 60;

/// Interval standard deviation above which the refresh rate is treated as variable
pub const VSYNC_STABILITY_THRESHOLD_MS: f64 = 2.0;

/// Accepted relative error between the mean interval and a nominal frame time
pub const VSYNC_RELATIVE_TOLERANCE: f64 = 0.05;

/// Weight of the newest value in the panel readout smoothing
pub const SMOOTHING_NEW_WEIGHT: f64 = 0.3;

/// Weight of the previous smoothed value in the panel readout smoothing
pub const SMOOTHING_OLD_WEIGHT: f64 = 0.7;

/// Nanoseconds per millisecond
pub const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Timeline label written by `begin()`
pub const CPU_STARTED_MARK: &str = "cpu-started";

/// Timeline label written when the CPU phase is closed
pub const CPU_FINISHED_MARK: &str = "cpu-finished";

/// Measure name for the CPU phase
pub const CPU_DURATION_MEASURE: &str = "cpu-duration";

/// Size in bytes of one resolved begin/end timestamp pair
pub const TIMESTAMP_PAIR_BYTES: u64 = 16;

/// Number of alternating timestamp readback buffers
pub const TIMESTAMP_READ_BUFFERS: usize = 2;

/// Frames that must be submitted before the first timestamp readback
pub const TIMESTAMP_WARMUP_FRAMES: u64 = 2;

/// Messages buffered by a [`crate::stats_feed`] before senders start dropping
pub const DEFAULT_FEED_CAPACITY: usize = 64;
