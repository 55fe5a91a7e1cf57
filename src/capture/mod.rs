//! Render-target preview capture.
//!
//! A capture downsamples a live render target into a small preview image
//! without disturbing the caller's render state. The GL-style variant
//! ([`RasterTextureCapture`]) finishes synchronously. The wgpu variant
//! ([`WgpuTextureCapture`]) ends with an async buffer mapping.

mod raster;
mod wgpu;

use std::{cell::RefCell, rc::Rc, sync::Arc};

use bevy::log::error;
use futures::{future::LocalBoxFuture, FutureExt};
use image::RgbaImage;

use crate::{
    constants::MIN_PREVIEW_EDGE,
    error::StatsError,
    raster::{FramebufferHandle, RasterContext},
};

pub use self::raster::{flip_rows, RasterTextureCapture};
pub use self::wgpu::{padded_bytes_per_row, unpad_rows, WgpuTextureCapture};

/// Tightly packed RGBA8 preview, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewBitmap {
    image: RgbaImage,
}

impl PreviewBitmap {
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, StatsError> {
        let len = pixels.len();
        RgbaImage::from_raw(width, height, pixels)
            .map(|image| Self { image })
            .ok_or(StatsError::BitmapSize { len, width, height })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<(u32, u32)> for PreviewSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Fit a `source_width` x `source_height` image inside `bounds`, keeping its
/// aspect ratio, with each edge at least [`MIN_PREVIEW_EDGE`].
///
/// Returns `None` for an empty source.
pub fn fit_preview_size(
    source_width: u32,
    source_height: u32,
    bounds: PreviewSize,
) -> Option<PreviewSize> {
    if source_width == 0 || source_height == 0 || bounds.width == 0 || bounds.height == 0 {
        return None;
    }
    let source_aspect = f64::from(source_width) / f64::from(source_height);
    let bounds_aspect = f64::from(bounds.width) / f64::from(bounds.height);
    let (width, height) = if source_aspect > bounds_aspect {
        (
            bounds.width,
            (f64::from(bounds.width) / source_aspect).round() as u32,
        )
    } else {
        (
            (f64::from(bounds.height) * source_aspect).round() as u32,
            bounds.height,
        )
    };
    Some(PreviewSize::new(
        width.max(MIN_PREVIEW_EDGE),
        height.max(MIN_PREVIEW_EDGE),
    ))
}

/// Placement of a preview inside a display panel, letterboxed to keep the
/// source aspect ratio. Units are whatever `panel` is expressed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

pub fn letterbox(source_aspect: f32, panel: (f32, f32)) -> Letterbox {
    let (panel_w, panel_h) = panel;
    if !(source_aspect.is_finite() && source_aspect > 0.0) || panel_h <= 0.0 {
        return Letterbox {
            x: 0.0,
            y: 0.0,
            width: panel_w,
            height: panel_h,
        };
    }
    if source_aspect > panel_w / panel_h {
        let height = panel_w / source_aspect;
        Letterbox {
            x: 0.0,
            y: (panel_h - height) / 2.0,
            width: panel_w,
            height,
        }
    } else {
        let width = panel_h * source_aspect;
        Letterbox {
            x: (panel_w - width) / 2.0,
            y: 0.0,
            width,
            height: panel_h,
        }
    }
}

/// A live render target the preview can read from.
#[derive(Debug, Clone)]
pub enum TextureSource {
    /// GL-style framebuffer with its pixel size
    Framebuffer {
        framebuffer: FramebufferHandle,
        width: u32,
        height: u32,
    },
    /// wgpu texture with `TEXTURE_BINDING` usage
    Texture {
        texture: Arc<::wgpu::Texture>,
        width: u32,
        height: u32,
    },
}

impl TextureSource {
    pub fn size(&self) -> (u32, u32) {
        match self {
            TextureSource::Framebuffer { width, height, .. }
            | TextureSource::Texture { width, height, .. } => (*width, *height),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TextureSource::Framebuffer { .. } => "framebuffer",
            TextureSource::Texture { .. } => "texture",
        }
    }
}

/// Engine render target that can expose its native handle and size.
pub trait RenderTargetSource {
    /// `None` when the target has no extractable native handle yet.
    fn texture_source(&self) -> Option<TextureSource>;
}

impl RenderTargetSource for TextureSource {
    fn texture_source(&self) -> Option<TextureSource> {
        Some(self.clone())
    }
}

impl RenderTargetSource for Arc<::wgpu::Texture> {
    fn texture_source(&self) -> Option<TextureSource> {
        Some(TextureSource::Texture {
            texture: Arc::clone(self),
            width: self.width(),
            height: self.height(),
        })
    }
}

/// Outcome of starting one capture.
pub enum CaptureJob {
    Ready(Result<PreviewBitmap, StatsError>),
    /// Deferred capture. GPU work is recorded when first polled.
    Pending(LocalBoxFuture<'static, Result<PreviewBitmap, StatsError>>),
}

impl CaptureJob {
    pub fn into_future(self) -> LocalBoxFuture<'static, Result<PreviewBitmap, StatsError>> {
        match self {
            CaptureJob::Ready(result) => futures::future::ready(result).boxed_local(),
            CaptureJob::Pending(future) => future,
        }
    }
}

/// Both capture variants behind one preview size.
pub struct PreviewCapture {
    size: PreviewSize,
    raster: Option<RasterTextureCapture>,
    wgpu: Option<Rc<RefCell<WgpuTextureCapture>>>,
}

impl PreviewCapture {
    pub fn new(size: PreviewSize) -> Self {
        Self {
            size,
            raster: None,
            wgpu: None,
        }
    }

    pub fn size(&self) -> PreviewSize {
        self.size
    }

    /// Enable the wgpu variant on `device`.
    pub fn attach_wgpu(&mut self, device: Arc<::wgpu::Device>, queue: Arc<::wgpu::Queue>) {
        self.wgpu = Some(Rc::new(RefCell::new(WgpuTextureCapture::new(
            device, queue, self.size,
        ))));
    }

    /// Resize both variants. No-op when the size is unchanged.
    pub fn resize(&mut self, size: PreviewSize, ctx: Option<&mut dyn RasterContext>) -> bool {
        if size == self.size {
            return false;
        }
        self.size = size;
        if let Some(raster) = self.raster.as_mut() {
            match ctx {
                Some(ctx) => {
                    raster.resize(ctx, size);
                }
                None => raster.set_size(size),
            }
        }
        if let Some(wgpu) = &self.wgpu {
            wgpu.borrow_mut().resize(size);
        }
        true
    }

    /// Start capturing `source`.
    ///
    /// Framebuffer sources need `ctx` and complete immediately. Texture
    /// sources need an attached wgpu device and complete asynchronously.
    pub fn capture(
        &mut self,
        source: &TextureSource,
        ctx: Option<&mut dyn RasterContext>,
    ) -> CaptureJob {
        match source {
            TextureSource::Framebuffer {
                framebuffer,
                width,
                height,
            } => {
                let Some(ctx) = ctx else {
                    return CaptureJob::Ready(Err(mismatch(source, "rasterization")));
                };
                let size = self.size;
                let raster = self
                    .raster
                    .get_or_insert_with(|| RasterTextureCapture::new(size));
                CaptureJob::Ready(raster.capture(ctx, *framebuffer, *width, *height))
            }
            TextureSource::Texture { texture, .. } => {
                let Some(wgpu) = &self.wgpu else {
                    return CaptureJob::Ready(Err(mismatch(source, "wgpu")));
                };
                let capture = Rc::clone(wgpu);
                let texture = Arc::clone(texture);
                CaptureJob::Pending(
                    async move {
                        let readback = capture.borrow_mut().start(&texture)?;
                        readback.await
                    }
                    .boxed_local(),
                )
            }
        }
    }

    /// Let the wgpu device run pending mapping callbacks.
    pub fn poll(&self) {
        if let Some(wgpu) = &self.wgpu {
            wgpu.borrow().poll();
        }
    }

    pub fn release(&mut self, ctx: Option<&mut dyn RasterContext>) {
        if let (Some(raster), Some(ctx)) = (self.raster.as_mut(), ctx) {
            raster.release(ctx);
        }
        self.raster = None;
        if let Some(wgpu) = self.wgpu.take() {
            wgpu.borrow_mut().release();
        }
    }
}

fn mismatch(source: &TextureSource, backend: &'static str) -> StatsError {
    let err = StatsError::SourceMismatch {
        source_kind: source.kind(),
        backend,
    };
    error!("Preview capture skipped: {err}");
    err
}
