use bevy::log::debug;

use super::{PreviewBitmap, PreviewSize};
use crate::{
    error::StatsError,
    raster::{ColorTarget, FramebufferHandle, RasterContext},
};

/// Framebuffer-blit preview capture for GL-style contexts.
///
/// Owns one preview-sized color target, created on first capture.
pub struct RasterTextureCapture {
    size: PreviewSize,
    target: Option<ColorTarget>,
    pixels: Vec<u8>,
}

impl RasterTextureCapture {
    pub fn new(size: PreviewSize) -> Self {
        Self {
            size,
            target: None,
            pixels: vec![0; rgba_len(size)],
        }
    }

    pub fn size(&self) -> PreviewSize {
        self.size
    }

    /// Recreate the color target for `size`. Returns `false` when the size is
    /// unchanged and nothing was touched.
    pub fn resize(&mut self, ctx: &mut dyn RasterContext, size: PreviewSize) -> bool {
        if size == self.size {
            return false;
        }
        if let Some(target) = self.target.take() {
            ctx.delete_color_target(target);
        }
        self.set_size(size);
        true
    }

    /// Record a new size without a context. An existing target is replaced on
    /// the next capture.
    pub(crate) fn set_size(&mut self, size: PreviewSize) {
        self.size = size;
        self.pixels = vec![0; rgba_len(size)];
    }

    /// Downscale `framebuffer` into the preview and read it back.
    ///
    /// The caller's read and draw framebuffer bindings are restored whether
    /// or not the capture succeeds.
    pub fn capture(
        &mut self,
        ctx: &mut dyn RasterContext,
        framebuffer: FramebufferHandle,
        source_width: u32,
        source_height: u32,
    ) -> Result<PreviewBitmap, StatsError> {
        let target = self.ensure_target(ctx)?;
        let saved = ctx.framebuffer_bindings();

        ctx.bind_read_framebuffer(Some(framebuffer));
        ctx.bind_draw_framebuffer(Some(target.framebuffer));
        ctx.blit_linear(
            (source_width, source_height),
            (target.width, target.height),
        );
        ctx.bind_read_framebuffer(Some(target.framebuffer));
        let read = ctx.read_rgba(target.width, target.height, &mut self.pixels);

        ctx.bind_read_framebuffer(saved.read);
        ctx.bind_draw_framebuffer(saved.draw);

        read.inspect_err(|err| debug!("Preview readback failed: {err}"))?;
        PreviewBitmap::from_rgba(
            target.width,
            target.height,
            flip_rows(&self.pixels, target.width, target.height),
        )
    }

    fn ensure_target(&mut self, ctx: &mut dyn RasterContext) -> Result<ColorTarget, StatsError> {
        match self.target {
            Some(target) if target.width == self.size.width && target.height == self.size.height => {
                Ok(target)
            }
            _ => {
                if let Some(stale) = self.target.take() {
                    ctx.delete_color_target(stale);
                }
                let target = ctx.create_color_target(self.size.width, self.size.height)?;
                self.target = Some(target);
                Ok(target)
            }
        }
    }

    pub fn release(&mut self, ctx: &mut dyn RasterContext) {
        if let Some(target) = self.target.take() {
            ctx.delete_color_target(target);
        }
    }
}

fn rgba_len(size: PreviewSize) -> usize {
    size.width as usize * size.height as usize * 4
}

/// Reverse the row order of a tightly packed RGBA image.
pub fn flip_rows(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let row = width as usize * 4;
    let rows = height as usize;
    let mut flipped = Vec::with_capacity(row * rows);
    for y in (0..rows).rev() {
        flipped.extend_from_slice(&pixels[y * row..(y + 1) * row]);
    }
    flipped
}
