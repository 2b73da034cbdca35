use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use tracing::{debug, warn};
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::device::{PassCompletion, WarpDevice, WarpPass};
use crate::error::WarpError;

use super::context::{GpuPower, HeadlessContext};
use super::program::{WarpProgram, TARGET_FORMAT};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct WarpUniforms {
    extent_params: [f32; 4],
}

pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl WgpuTexture {
    fn new(texture: wgpu::Texture) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let size = (texture.width(), texture.height());
        Self {
            texture,
            view,
            size,
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    len: usize,
}

impl WgpuBuffer {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Headless `wgpu` device that renders warp passes into offscreen textures.
pub struct WgpuDevice {
    context: HeadlessContext,
}

impl WgpuDevice {
    pub fn new(power: GpuPower) -> Result<Self> {
        let context = HeadlessContext::new(power)?;
        Ok(Self { context })
    }

    pub fn adapter_name(&self) -> &str {
        &self.context.adapter_info.name
    }

    /// Runs `f` inside error scopes, mapping out-of-memory to
    /// [`WarpError::ResourceExhaustion`] and validation failures through
    /// `on_validation`.
    fn scoped<T>(
        &self,
        what: &str,
        on_validation: fn(String) -> WarpError,
        f: impl FnOnce() -> T,
    ) -> Result<T, WarpError> {
        if self.context.is_lost() {
            return Err(WarpError::DeviceLost);
        }
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());

        if let Some(err) = out_of_memory {
            warn!(what, error = %err, "GPU allocation failed");
            return Err(WarpError::ResourceExhaustion(format!("{what}: {err}")));
        }
        if let Some(err) = validation {
            warn!(what, error = %err, "GPU validation failed");
            return Err(on_validation(format!("{what}: {err}")));
        }
        Ok(value)
    }

    /// Copies a texture back to host memory.
    pub fn read_texture(&self, texture: &WgpuTexture) -> Result<RgbaImage> {
        let device = &self.context.device;
        let (width, height) = texture.size;
        let unpadded_row = width as usize * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded_row = unpadded_row.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("geo image readback"),
            size: (padded_row * height as usize) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("geo image readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .context("failed to wait for texture readback")?;
        receiver
            .recv()
            .context("readback callback was dropped")?
            .context("failed to map readback buffer")?;

        let mut pixels = Vec::with_capacity(unpadded_row * height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded_row) {
                pixels.extend_from_slice(&row[..unpadded_row]);
            }
        }
        buffer.unmap();

        let len = pixels.len();
        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("readback produced {len} bytes for a {width}x{height} texture"))
    }
}

impl WarpDevice for WgpuDevice {
    type Texture = WgpuTexture;
    type Buffer = WgpuBuffer;
    type Program = WarpProgram;

    fn max_texture_dimension(&self) -> u32 {
        self.context.max_texture_dimension
    }

    fn create_program(&self) -> Result<Self::Program, WarpError> {
        self.scoped("warp program", WarpError::Program, || {
            WarpProgram::new(&self.context.device)
        })
    }

    fn create_vertex_buffer(
        &self,
        label: &str,
        data: &[[f32; 2]],
    ) -> Result<Self::Buffer, WarpError> {
        let buffer = self.scoped(label, WarpError::ResourceExhaustion, || {
            self.context
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(data),
                    usage: wgpu::BufferUsages::VERTEX,
                })
        })?;
        Ok(WgpuBuffer {
            buffer,
            len: data.len(),
        })
    }

    fn create_index_buffer(&self, label: &str, data: &[u32]) -> Result<Self::Buffer, WarpError> {
        let buffer = self.scoped(label, WarpError::ResourceExhaustion, || {
            self.context
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(data),
                    usage: wgpu::BufferUsages::INDEX,
                })
        })?;
        Ok(WgpuBuffer {
            buffer,
            len: data.len(),
        })
    }

    fn upload_texture(&self, image: &RgbaImage) -> Result<Self::Texture, WarpError> {
        let (width, height) = image.dimensions();
        let texture = self.scoped("source texture", WarpError::ResourceExhaustion, || {
            self.context.device.create_texture_with_data(
                &self.context.queue,
                &wgpu::TextureDescriptor {
                    label: Some("geo image source"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                TextureDataOrder::LayerMajor,
                image.as_raw(),
            )
        })?;
        debug!(width, height, "uploaded source texture to GPU");
        Ok(WgpuTexture::new(texture))
    }

    fn create_render_target(&self, width: u32, height: u32) -> Result<Self::Texture, WarpError> {
        let texture = self.scoped("warp target", WarpError::ResourceExhaustion, || {
            self.context.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("geo image output"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        })?;
        Ok(WgpuTexture::new(texture))
    }

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32) {
        texture.size
    }

    fn draw_warp(&self, pass: &WarpPass<'_, Self>) -> Result<PassCompletion, WarpError> {
        let device = &self.context.device;
        let queue = &self.context.queue;
        self.scoped("warp pass", WarpError::Program, || {
            let uniforms = WarpUniforms {
                extent_params: pass.extent_params,
            };
            let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("geo image warp uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("geo image warp bind group"),
                layout: &pass.program.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&pass.source.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&pass.program.sampler),
                    },
                ],
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("geo image warp encoder"),
            });
            {
                let [r, g, b, a] = pass.clear;
                let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("geo image warp pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &pass.target.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                let (width, height) = pass.viewport;
                render_pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
                render_pass.set_pipeline(&pass.program.pipeline);
                render_pass.set_bind_group(0, &bind_group, &[]);
                render_pass.set_vertex_buffer(0, pass.tex_coords.buffer.slice(..));
                render_pass.set_vertex_buffer(1, pass.corners.buffer.slice(..));
                render_pass.set_index_buffer(
                    pass.index_buffer.buffer.slice(..),
                    wgpu::IndexFormat::Uint32,
                );
                render_pass.draw_indexed(0..pass.index_count, 0, 0..1);
            }
            queue.submit(Some(encoder.finish()));
        })?;

        let (signal, completion) = PassCompletion::channel();
        queue.on_submitted_work_done(move || signal.complete());
        Ok(completion)
    }

    fn maintain(&self) {
        if let Err(err) = self.context.device.poll(wgpu::PollType::Poll) {
            warn!(error = %err, "GPU poll failed");
        }
    }
}
