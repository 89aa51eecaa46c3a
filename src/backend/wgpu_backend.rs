//! wgpu implementation of [`RenderBackend`].
//!
//! Pipelines are built from the WGSL emitted by the baker. Creation calls run
//! inside validation and out-of-memory error scopes so a bad shader or an
//! exhausted device surfaces as [`CompositorError::ResourceCreation`] instead
//! of reaching the uncaptured-error handler.

use std::borrow::Cow;

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;

use crate::{
    error::{CompositorError, CompositorResult},
    pass_graph::EdgeWrap,
    shader::{
        CHANNEL_BINDING_BASE, CompiledModule, LABELS_BINDING, SAMPLER_BINDING, ShaderInterface,
        UNIFORM_BINDING,
    },
};

use super::{
    BindingsDesc, BlendMode, DrawCall, DrawTarget, LoadAction, PipelineDesc, QUAD_VERTEX_STRIDE,
    RenderBackend,
};

/// The host surface for one frame.
pub struct WgpuTarget {
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
}

pub struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl WgpuTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

pub struct WgpuPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            encoder: None,
        }
    }

    /// A backend on the default adapter with no surface, for offline
    /// rendering and tests.
    pub fn headless() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a GPU adapter")?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("zonefx device"),
            ..Default::default()
        }))
        .context("failed to create GPU device")?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Run `create` inside error scopes and turn captured errors into
    /// [`CompositorError::ResourceCreation`].
    fn scoped<T>(&self, what: &str, create: impl FnOnce(&wgpu::Device) -> T) -> CompositorResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            None => Ok(value),
            Some(err) => {
                tracing::warn!(what, error = %err, "GPU object creation failed");
                Err(CompositorError::resource(what, err))
            }
        }
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("zonefx frame"),
            })
        })
    }

    fn shader_module(
        device: &wgpu::Device,
        label: &str,
        module: &CompiledModule,
    ) -> Option<wgpu::ShaderModule> {
        let wgsl = module.wgsl()?;
        Some(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(wgsl)),
        }))
    }
}

impl RenderBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Texture = WgpuTexture;
    type Sampler = wgpu::Sampler;
    type Pipeline = WgpuPipeline;
    type Bindings = wgpu::BindGroup;
    type Target = WgpuTarget;

    fn target_format(&self, target: &WgpuTarget) -> wgpu::TextureFormat {
        target.format
    }

    fn create_vertex_buffer(&mut self, label: &str, contents: &[u8]) -> CompositorResult<wgpu::Buffer> {
        self.scoped(label, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::VERTEX,
            })
        })
    }

    fn create_uniform_buffer(&mut self, label: &str, size: u64) -> CompositorResult<wgpu::Buffer> {
        self.scoped(label, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })
    }

    fn write_buffer(&mut self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_render_target(
        &mut self,
        label: &str,
        size: (u32, u32),
        format: wgpu::TextureFormat,
    ) -> CompositorResult<WgpuTexture> {
        self.scoped(label, |device| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent(size),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            WgpuTexture { texture, view }
        })
    }

    fn create_texture_rgba(
        &mut self,
        label: &str,
        size: (u32, u32),
        pixels: &[u8],
    ) -> CompositorResult<WgpuTexture> {
        let expected = size.0 as usize * size.1 as usize * 4;
        if expected == 0 || pixels.len() != expected {
            return Err(CompositorError::resource(
                label,
                format!(
                    "{}x{} texture needs {expected} bytes, got {}",
                    size.0,
                    size.1,
                    pixels.len()
                ),
            ));
        }
        let queue = &self.queue;
        self.scoped(label, |device| {
            let texture = device.create_texture_with_data(
                queue,
                &wgpu::TextureDescriptor {
                    label: Some(label),
                    size: extent(size),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                pixels,
            );
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            WgpuTexture { texture, view }
        })
    }

    fn write_texture_rgba(&mut self, texture: &WgpuTexture, size: (u32, u32), pixels: &[u8]) {
        if size.0 == 0 || size.1 == 0 || pixels.len() != size.0 as usize * size.1 as usize * 4 {
            tracing::warn!(?size, bytes = pixels.len(), "skipping texture write with bad size");
            return;
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.0 * 4),
                rows_per_image: Some(size.1),
            },
            extent(size),
        );
    }

    fn create_sampler(&mut self, wrap: EdgeWrap) -> CompositorResult<wgpu::Sampler> {
        let address_mode = match wrap {
            EdgeWrap::Clamp => wgpu::AddressMode::ClampToEdge,
            EdgeWrap::Repeat => wgpu::AddressMode::Repeat,
        };
        self.scoped("channel sampler", |device| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("channel sampler"),
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Nearest,
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                ..Default::default()
            })
        })
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> CompositorResult<WgpuPipeline> {
        let blend = match desc.blend {
            BlendMode::Replace => wgpu::BlendState::REPLACE,
            BlendMode::PremultipliedOver => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
        };
        let created = self.scoped(desc.label, |device| {
            let vertex = Self::shader_module(device, desc.label, desc.vertex)?;
            let fragment = Self::shader_module(device, desc.label, desc.fragment)?;
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label),
                entries: &layout_entries(&desc.interface),
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex,
                    entry_point: None,
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: QUAD_VERTEX_STRIDE,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment,
                    entry_point: None,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: desc.format,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });
            Some(WgpuPipeline { pipeline, layout })
        })?;
        created.ok_or_else(|| CompositorError::resource(desc.label, "module has no WGSL output"))
    }

    fn create_bindings(&mut self, desc: &BindingsDesc<'_, Self>) -> CompositorResult<wgpu::BindGroup> {
        let mut entries = Vec::new();
        let interface = &desc.interface;
        if interface.uniform_block_size.is_some() {
            entries.push(wgpu::BindGroupEntry {
                binding: UNIFORM_BINDING,
                resource: desc.uniform.as_entire_binding(),
            });
        }
        if interface.sampler {
            entries.push(wgpu::BindGroupEntry {
                binding: SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(desc.sampler),
            });
        }
        if interface.labels {
            entries.push(wgpu::BindGroupEntry {
                binding: LABELS_BINDING,
                resource: wgpu::BindingResource::TextureView(&desc.labels.view),
            });
        }
        for (slot, channel) in desc.channels.iter().enumerate() {
            if !interface.declares_channel(slot) {
                continue;
            }
            let Some(texture) = channel else {
                return Err(CompositorError::resource(
                    desc.label,
                    format!("channel {slot} is declared but has no texture"),
                ));
            };
            entries.push(wgpu::BindGroupEntry {
                binding: CHANNEL_BINDING_BASE + slot as u32,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
        }

        self.scoped(desc.label, |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(desc.label),
                layout: &desc.pipeline.layout,
                entries: &entries,
            })
        })
    }

    fn begin_frame(&mut self) {
        self.encoder();
    }

    fn clear(&mut self, texture: &WgpuTexture) {
        let encoder = self.encoder();
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &texture.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
    }

    fn draw(&mut self, call: &DrawCall<'_, Self>) {
        let view = match &call.target {
            DrawTarget::Offscreen(texture) => &texture.view,
            DrawTarget::Host(target) => &target.view,
        };
        let load = match call.load {
            LoadAction::Clear => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            LoadAction::Load => wgpu::LoadOp::Load,
        };
        let encoder = self.encoder();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(call.label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(&call.pipeline.pipeline);
        pass.set_bind_group(0, call.bindings, &[]);
        pass.set_vertex_buffer(0, call.vertices.slice(..));
        pass.draw(0..4, 0..1);
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}

fn extent(size: (u32, u32)) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.0.max(1),
        height: size.1.max(1),
        depth_or_array_layers: 1,
    }
}

/// Bind group layout with exactly the slots the shader pair declares.
fn layout_entries(interface: &ShaderInterface) -> Vec<wgpu::BindGroupLayoutEntry> {
    let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
    let texture = wgpu::BindingType::Texture {
        sample_type: wgpu::TextureSampleType::Float { filterable: true },
        view_dimension: wgpu::TextureViewDimension::D2,
        multisampled: false,
    };
    let entry = |binding, ty| wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty,
        count: None,
    };

    let mut entries = Vec::new();
    if interface.uniform_block_size.is_some() {
        entries.push(entry(
            UNIFORM_BINDING,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        ));
    }
    if interface.sampler {
        entries.push(entry(
            SAMPLER_BINDING,
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        ));
    }
    if interface.labels {
        entries.push(entry(LABELS_BINDING, texture));
    }
    for slot in 0..interface.channels.len() {
        if interface.declares_channel(slot) {
            entries.push(entry(CHANNEL_BINDING_BASE + slot as u32, texture));
        }
    }
    entries
}
