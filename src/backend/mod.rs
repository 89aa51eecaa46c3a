//! The GPU operations the compositor needs, behind one trait.
//!
//! [`wgpu_backend::WgpuBackend`] is the production implementation. Everything
//! above this module only holds the associated handle types and drops them to
//! release GPU memory.

pub mod wgpu_backend;

use wgpu::TextureFormat;

use crate::{
    error::CompositorResult,
    pass_graph::EdgeWrap,
    shader::{CompiledModule, MAX_CHANNELS, ShaderInterface},
};

pub use wgpu_backend::{WgpuBackend, WgpuTarget};

/// Format of every off-screen buffer target.
pub const BUFFER_TARGET_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Fullscreen quad as a triangle strip: `vec2 position, vec2 uv` per vertex.
pub const QUAD_VERTICES: [[f32; 4]; 4] = [
    [-1.0, -1.0, 0.0, 1.0],
    [1.0, -1.0, 1.0, 1.0],
    [-1.0, 1.0, 0.0, 0.0],
    [1.0, 1.0, 1.0, 0.0],
];
pub const QUAD_VERTEX_STRIDE: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Overwrite the target. Used by buffer passes.
    Replace,
    /// Premultiplied source-over. Used by the image pass on the host target.
    PremultipliedOver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadAction {
    /// Clear to transparent black before drawing.
    Clear,
    Load,
}

pub struct PipelineDesc<'a> {
    pub label: &'a str,
    pub vertex: &'a CompiledModule,
    pub fragment: &'a CompiledModule,
    pub interface: ShaderInterface,
    pub format: TextureFormat,
    pub blend: BlendMode,
}

/// Resources for one binding set. `channels[i]` must be `Some` exactly when
/// the interface declares channel `i`.
pub struct BindingsDesc<'a, B: RenderBackend + ?Sized> {
    pub label: &'a str,
    pub pipeline: &'a B::Pipeline,
    pub interface: ShaderInterface,
    pub uniform: &'a B::Buffer,
    pub sampler: &'a B::Sampler,
    pub labels: &'a B::Texture,
    pub channels: [Option<&'a B::Texture>; MAX_CHANNELS],
}

pub enum DrawTarget<'a, B: RenderBackend + ?Sized> {
    Offscreen(&'a B::Texture),
    Host(&'a B::Target),
}

pub struct DrawCall<'a, B: RenderBackend + ?Sized> {
    pub label: &'a str,
    pub target: DrawTarget<'a, B>,
    pub load: LoadAction,
    pub pipeline: &'a B::Pipeline,
    pub bindings: &'a B::Bindings,
    pub vertices: &'a B::Buffer,
}

pub trait RenderBackend {
    type Buffer;
    type Texture;
    type Sampler;
    type Pipeline;
    type Bindings;
    /// The host-owned surface the image pass draws onto.
    type Target;

    fn target_format(&self, target: &Self::Target) -> TextureFormat;

    fn create_vertex_buffer(&mut self, label: &str, contents: &[u8])
    -> CompositorResult<Self::Buffer>;

    fn create_uniform_buffer(&mut self, label: &str, size: u64) -> CompositorResult<Self::Buffer>;

    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    fn create_render_target(
        &mut self,
        label: &str,
        size: (u32, u32),
        format: TextureFormat,
    ) -> CompositorResult<Self::Texture>;

    /// An `Rgba8Unorm` texture initialised from tightly packed pixels.
    fn create_texture_rgba(
        &mut self,
        label: &str,
        size: (u32, u32),
        pixels: &[u8],
    ) -> CompositorResult<Self::Texture>;

    /// Replace the contents of a texture made by
    /// [`RenderBackend::create_texture_rgba`] with same-sized pixels.
    fn write_texture_rgba(&mut self, texture: &Self::Texture, size: (u32, u32), pixels: &[u8]);

    fn create_sampler(&mut self, wrap: EdgeWrap) -> CompositorResult<Self::Sampler>;

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> CompositorResult<Self::Pipeline>;

    fn create_bindings(
        &mut self,
        desc: &BindingsDesc<'_, Self>,
    ) -> CompositorResult<Self::Bindings>;

    fn begin_frame(&mut self);

    /// Clear an off-screen texture to transparent black.
    fn clear(&mut self, texture: &Self::Texture);

    fn draw(&mut self, call: &DrawCall<'_, Self>);

    fn submit(&mut self);
}
