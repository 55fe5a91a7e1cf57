//! GL-style rasterization context seam.
//!
//! The crate never talks to a GL binding directly. Hosts that render through
//! a GL-like API implement [`RasterContext`] over their context; the timer
//! query backend and the framebuffer preview capture only use the calls
//! listed here.

use crate::error::StatsError;

/// Handle of an elapsed-time query object owned by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub u32);

/// Handle of a framebuffer object. `None` bindings mean the default framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Read and draw framebuffer bindings at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramebufferBindings {
    pub read: Option<FramebufferHandle>,
    pub draw: Option<FramebufferHandle>,
}

/// Color texture with an attached framebuffer, created by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTarget {
    pub framebuffer: FramebufferHandle,
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
}

/// Operations of a GL-style context used for timing and preview capture.
pub trait RasterContext {
    /// Whether elapsed-time queries with disjoint detection are available.
    fn supports_timer_queries(&self) -> bool;

    fn create_timer_query(&mut self) -> Result<QueryHandle, StatsError>;

    /// Start the elapsed-time query. Only one can be active at a time.
    fn begin_time_elapsed(&mut self, query: QueryHandle);

    /// Stop the currently active elapsed-time query.
    fn end_time_elapsed(&mut self);

    fn query_result_available(&mut self, query: QueryHandle) -> bool;

    /// Elapsed GPU time of a finished query, in nanoseconds.
    fn query_result_ns(&mut self, query: QueryHandle) -> u64;

    /// Whether a GPU reset or mode switch invalidated in-flight queries.
    fn gpu_disjoint(&mut self) -> bool;

    fn delete_query(&mut self, query: QueryHandle);

    fn framebuffer_bindings(&self) -> FramebufferBindings;

    fn bind_read_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    fn bind_draw_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    /// Create an RGBA8 color texture with linear filtering and a framebuffer
    /// that renders into it.
    fn create_color_target(&mut self, width: u32, height: u32) -> Result<ColorTarget, StatsError>;

    fn delete_color_target(&mut self, target: ColorTarget);

    /// Linear-filtered color blit from `(0, 0, src)` of the read framebuffer to
    /// `(0, 0, dst)` of the draw framebuffer.
    fn blit_linear(&mut self, src: (u32, u32), dst: (u32, u32));

    /// Read RGBA8 pixels from the bound read framebuffer, bottom row first.
    fn read_rgba(&mut self, width: u32, height: u32, out: &mut [u8]) -> Result<(), StatsError>;
}
