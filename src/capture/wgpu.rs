use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{channel::oneshot, future::LocalBoxFuture, FutureExt};

use super::{PreviewBitmap, PreviewSize};
use crate::error::StatsError;

const PREVIEW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const BLIT_SHADER: &str = r#"
@group(0) @binding(0) var preview_sampler: sampler;
@group(0) @binding(1) var source_texture: texture_2d<f32>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

// One triangle covering the whole viewport.
@vertex
fn vertex_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    var uvs = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(2.0, 1.0),
        vec2<f32>(0.0, -1.0),
    );
    var out: VertexOutput;
    out.position = vec4<f32>(positions[index], 0.0, 1.0);
    out.uv = uvs[index];
    return out;
}

@fragment
fn fragment_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(source_texture, preview_sampler, uv);
}
"#;

/// Row stride of a `width`-pixel RGBA8 row in a texture-to-buffer copy.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

/// Strip the per-row padding of a texture-to-buffer copy.
pub fn unpad_rows(data: &[u8], width: u32, height: u32, bytes_per_row: u32) -> Vec<u8> {
    let row = width as usize * 4;
    let stride = bytes_per_row as usize;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        pixels.extend_from_slice(&data[start..start + row]);
    }
    pixels
}

struct BlitResources {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

struct SizedResources {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: Arc<wgpu::Buffer>,
    /// Set from submission until the staging buffer is unmapped again
    staging_busy: Arc<AtomicBool>,
    bytes_per_row: u32,
}

/// Full-screen-triangle preview capture on a wgpu device.
///
/// The pipeline is built on first use. The preview texture and staging
/// buffer follow the preview size and are rebuilt after a resize.
pub struct WgpuTextureCapture {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    size: PreviewSize,
    blit: Option<BlitResources>,
    sized: Option<SizedResources>,
}

impl WgpuTextureCapture {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, size: PreviewSize) -> Self {
        Self {
            device,
            queue,
            size,
            blit: None,
            sized: None,
        }
    }

    pub fn size(&self) -> PreviewSize {
        self.size
    }

    pub fn resize(&mut self, size: PreviewSize) -> bool {
        if size == self.size {
            return false;
        }
        self.size = size;
        if let Some(sized) = self.sized.take() {
            sized.texture.destroy();
            sized.staging.destroy();
        }
        true
    }

    /// Record and submit the blit of `source` and start mapping the result.
    ///
    /// The returned future completes once the device has mapped the staging
    /// buffer, see [`WgpuTextureCapture::poll`]. Commands the device rejects
    /// are caught in a validation scope and resolve to an error.
    pub fn start(
        &mut self,
        source: &wgpu::Texture,
    ) -> Result<LocalBoxFuture<'static, Result<PreviewBitmap, StatsError>>, StatsError> {
        if self.blit.is_none() {
            self.blit = Some(create_blit_resources(&self.device));
        }
        if self.sized.is_none() {
            self.sized = Some(create_sized_resources(&self.device, self.size));
        }
        let (Some(blit), Some(sized)) = (&self.blit, &self.sized) else {
            return Err(StatsError::ResourcesUnavailable);
        };
        check_source(source)?;
        if sized.staging_busy.swap(true, Ordering::SeqCst) {
            return Err(StatsError::BufferMap("staging buffer is still mapped".into()));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_stats_preview_bind_group"),
            layout: &blit.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&blit.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_stats_preview_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame_stats_preview_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &sized.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&blit.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        let PreviewSize { width, height } = self.size;
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &sized.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &sized.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(sized.bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        let validation = self.device.pop_error_scope();

        let staging = Arc::clone(&sized.staging);
        let busy = Arc::clone(&sized.staging_busy);
        let callback_busy = Arc::clone(&busy);
        let bytes_per_row = sized.bytes_per_row;
        let (tx, rx) = oneshot::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if result.is_err() {
                    callback_busy.store(false, Ordering::SeqCst);
                }
                let _ = tx.send(result);
            });

        Ok(async move {
            let rejected = validation.await;
            match rx.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(StatsError::BufferMap(err.to_string())),
                Err(_) => {
                    busy.store(false, Ordering::SeqCst);
                    return Err(StatsError::MapCancelled);
                }
            }
            let pixels = {
                let view = staging.slice(..).get_mapped_range();
                unpad_rows(&view, width, height, bytes_per_row)
            };
            staging.unmap();
            busy.store(false, Ordering::SeqCst);
            if let Some(err) = rejected {
                return Err(StatsError::GpuValidation(err.to_string()));
            }
            PreviewBitmap::from_rgba(width, height, pixels)
        }
        .boxed_local())
    }

    /// Run pending mapping callbacks without blocking.
    pub fn poll(&self) {
        let _ = self.device.poll(wgpu::Maintain::Poll);
    }

    pub fn release(&mut self) {
        if let Some(sized) = self.sized.take() {
            sized.texture.destroy();
            sized.staging.destroy();
        }
        self.blit = None;
    }
}

/// Reject textures the blit pipeline cannot sample.
fn check_source(source: &wgpu::Texture) -> Result<(), StatsError> {
    if source.dimension() != wgpu::TextureDimension::D2 {
        return Err(StatsError::UnsupportedTexture("not a 2D texture"));
    }
    if source.sample_count() > 1 {
        return Err(StatsError::UnsupportedTexture("multisampled"));
    }
    if !source.usage().contains(wgpu::TextureUsages::TEXTURE_BINDING) {
        return Err(StatsError::UnsupportedTexture("missing TEXTURE_BINDING usage"));
    }
    match source.format().sample_type(None, None) {
        Some(wgpu::TextureSampleType::Float { filterable: true }) => Ok(()),
        _ => Err(StatsError::UnsupportedTexture("format is not filterable float")),
    }
}

fn create_blit_resources(device: &wgpu::Device) -> BlitResources {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("frame_stats_preview_shader"),
        source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("frame_stats_preview_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
        ],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("frame_stats_preview_pipeline_layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("frame_stats_preview_pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vertex_main"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fragment_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: PREVIEW_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("frame_stats_preview_sampler"),
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    });
    BlitResources {
        pipeline,
        layout,
        sampler,
    }
}

fn create_sized_resources(device: &wgpu::Device, size: PreviewSize) -> SizedResources {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("frame_stats_preview_texture"),
        size: wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: PREVIEW_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let bytes_per_row = padded_bytes_per_row(size.width);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("frame_stats_preview_staging"),
        size: u64::from(bytes_per_row) * u64::from(size.height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    SizedResources {
        texture,
        view,
        staging: Arc::new(staging),
        staging_busy: Arc::new(AtomicBool::new(false)),
        bytes_per_row,
    }
}
