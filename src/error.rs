//! Error type shared by the measurement and capture paths.
//!
//! None of these errors reach the host's frame loop: the per-frame entry
//! points log them and carry on with the previous value.

use thiserror::Error;

/// Everything that can go wrong while timing a frame or capturing a preview.
#[derive(Debug, Error)]
pub enum StatsError {
    /// The end mark was earlier than the start mark, or not finite
    #[error("invalid CPU interval of {0} ms")]
    InvalidInterval(f64),

    /// The context refused to create a timer query object. Returned by
    /// [`crate::RasterContext`] implementations.
    #[error("timer query could not be created: {0}")]
    QueryCreation(String),

    /// The encoder handed to `end()` is not the type the device records into
    #[error("command encoder is not a {expected}")]
    EncoderMismatch { expected: &'static str },

    /// A readback buffer could not be mapped
    #[error("readback buffer mapping failed: {0}")]
    BufferMap(String),

    /// The mapping callback was dropped before it reported a result
    #[error("readback was cancelled before the mapping completed")]
    MapCancelled,

    /// Preview target, pipeline or staging buffer is missing
    #[error("preview capture resources are not initialized")]
    ResourcesUnavailable,

    /// Creating an owned GPU resource failed. Returned by
    /// [`crate::RasterContext`] implementations.
    #[error("could not create {what}: {reason}")]
    ResourceCreation { what: &'static str, reason: String },

    /// Reading pixels back from the preview target failed
    #[error("pixel readback failed: {0}")]
    PixelReadback(String),

    /// A pixel buffer does not match the dimensions it claims
    #[error("pixel buffer of {len} bytes does not match a {width}x{height} RGBA image")]
    BitmapSize { len: usize, width: u32, height: u32 },

    /// A texture panel name was used before `add_texture_panel`
    #[error("texture panel `{0}` is not registered")]
    UnknownPanel(String),

    /// The device rejected the commands recorded for a capture
    #[error("GPU validation failed: {0}")]
    GpuValidation(String),

    /// The texture cannot be sampled by the preview blit
    #[error("texture cannot be previewed: {0}")]
    UnsupportedTexture(&'static str),

    /// A texture source cannot be captured by the active backend
    #[error("{source_kind} sources need a {backend} backend")]
    SourceMismatch {
        source_kind: &'static str,
        backend: &'static str,
    },
}
