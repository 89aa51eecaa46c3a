//! A [`RenderBackend`] that records every call instead of touching a GPU.

#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use wgpu::TextureFormat;
use zonefx_compositor::{
    CompositorError, CompositorResult, EdgeWrap, FrameInput, RenderBackend, ShaderLanguage,
    ShaderLocation, ShaderModuleCache, ZoneCompositor,
    backend::{BindingsDesc, BlendMode, DrawCall, DrawTarget, LoadAction, PipelineDesc},
    shader::MAX_CHANNELS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Buffer(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Texture {
    pub id: u32,
    pub size: (u32, u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pipeline {
    pub id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bindings {
    pub id: u32,
    pub labels: u32,
    pub channels: [Option<u32>; MAX_CHANNELS],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostTarget {
    pub format: TextureFormat,
}

impl HostTarget {
    pub fn new() -> Self {
        Self {
            format: TextureFormat::Bgra8Unorm,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawnTo {
    Texture(u32),
    Host,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    CreateVertexBuffer { id: u32, len: usize },
    CreateUniformBuffer { id: u32, size: u64 },
    WriteBuffer { buffer: u32, offset: u64, len: usize },
    CreateTarget { id: u32, label: String, size: (u32, u32), format: TextureFormat },
    CreateTexture { id: u32, label: String, size: (u32, u32) },
    WriteTexture { id: u32, size: (u32, u32) },
    CreateSampler { wrap: EdgeWrap },
    CreatePipeline { id: u32, label: String, format: TextureFormat, blend: BlendMode },
    CreateBindings { id: u32, label: String, channels: [Option<u32>; MAX_CHANNELS] },
    BeginFrame,
    Clear { texture: u32 },
    Draw { label: String, target: DrawnTo, load: LoadAction, bindings: Bindings },
    Submit,
}

#[derive(Default)]
pub struct RecordingBackend {
    pub ops: Vec<Op>,
    next_id: u32,
    /// Fail this many upcoming pipeline creations.
    pub fail_pipelines: usize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn take_ops(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.ops)
    }
}

impl RenderBackend for RecordingBackend {
    type Buffer = Buffer;
    type Texture = Texture;
    type Sampler = EdgeWrap;
    type Pipeline = Pipeline;
    type Bindings = Bindings;
    type Target = HostTarget;

    fn target_format(&self, target: &HostTarget) -> TextureFormat {
        target.format
    }

    fn create_vertex_buffer(&mut self, _label: &str, contents: &[u8]) -> CompositorResult<Buffer> {
        let id = self.id();
        self.ops.push(Op::CreateVertexBuffer {
            id,
            len: contents.len(),
        });
        Ok(Buffer(id))
    }

    fn create_uniform_buffer(&mut self, _label: &str, size: u64) -> CompositorResult<Buffer> {
        let id = self.id();
        self.ops.push(Op::CreateUniformBuffer { id, size });
        Ok(Buffer(id))
    }

    fn write_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) {
        self.ops.push(Op::WriteBuffer {
            buffer: buffer.0,
            offset,
            len: data.len(),
        });
    }

    fn create_render_target(
        &mut self,
        label: &str,
        size: (u32, u32),
        format: TextureFormat,
    ) -> CompositorResult<Texture> {
        let id = self.id();
        self.ops.push(Op::CreateTarget {
            id,
            label: label.to_string(),
            size,
            format,
        });
        Ok(Texture { id, size })
    }

    fn create_texture_rgba(
        &mut self,
        label: &str,
        size: (u32, u32),
        pixels: &[u8],
    ) -> CompositorResult<Texture> {
        assert_eq!(pixels.len(), (size.0 * size.1 * 4) as usize);
        let id = self.id();
        self.ops.push(Op::CreateTexture {
            id,
            label: label.to_string(),
            size,
        });
        Ok(Texture { id, size })
    }

    fn write_texture_rgba(&mut self, texture: &Texture, size: (u32, u32), _pixels: &[u8]) {
        self.ops.push(Op::WriteTexture {
            id: texture.id,
            size,
        });
    }

    fn create_sampler(&mut self, wrap: EdgeWrap) -> CompositorResult<EdgeWrap> {
        self.ops.push(Op::CreateSampler { wrap });
        Ok(wrap)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc<'_>) -> CompositorResult<Pipeline> {
        if self.fail_pipelines > 0 {
            self.fail_pipelines -= 1;
            return Err(CompositorError::resource(desc.label, "injected failure"));
        }
        let id = self.id();
        self.ops.push(Op::CreatePipeline {
            id,
            label: desc.label.to_string(),
            format: desc.format,
            blend: desc.blend,
        });
        Ok(Pipeline { id })
    }

    fn create_bindings(&mut self, desc: &BindingsDesc<'_, Self>) -> CompositorResult<Bindings> {
        let id = self.id();
        let channels = desc.channels.map(|c| c.map(|t| t.id));
        self.ops.push(Op::CreateBindings {
            id,
            label: desc.label.to_string(),
            channels,
        });
        Ok(Bindings {
            id,
            labels: desc.labels.id,
            channels,
        })
    }

    fn begin_frame(&mut self) {
        self.ops.push(Op::BeginFrame);
    }

    fn clear(&mut self, texture: &Texture) {
        self.ops.push(Op::Clear {
            texture: texture.id,
        });
    }

    fn draw(&mut self, call: &DrawCall<'_, Self>) {
        let target = match &call.target {
            DrawTarget::Offscreen(texture) => DrawnTo::Texture(texture.id),
            DrawTarget::Host(_) => DrawnTo::Host,
        };
        self.ops.push(Op::Draw {
            label: call.label.to_string(),
            target,
            load: call.load,
            bindings: *call.bindings,
        });
    }

    fn submit(&mut self) {
        self.ops.push(Op::Submit);
    }
}

// ── Shader sources ──

const PARAMS_WGSL: &str = "struct Params {
    transform: mat4x4<f32>,
    opacity: f32,
    time: f32,
    delta: f32,
    frame: i32,
};
@group(0) @binding(0) var<uniform> params: Params;
";

pub fn vertex_wgsl() -> String {
    format!(
        "{PARAMS_WGSL}
struct VsOut {{
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
}};

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VsOut {{
    var out: VsOut;
    out.pos = params.transform * vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}}
"
    )
}

/// A fragment shader sampling the given channels. `tint` only changes the
/// text, so each value gives a distinct shader identity.
pub fn fragment_wgsl(channels: &[usize], tint: f32) -> String {
    let mut text = String::from(PARAMS_WGSL);
    if !channels.is_empty() {
        text.push_str("@group(0) @binding(1) var samp: sampler;\n");
    }
    for slot in channels {
        text.push_str(&format!(
            "@group(0) @binding({}) var channel{slot}: texture_2d<f32>;\n",
            3 + slot
        ));
    }
    text.push_str("\n@fragment\nfn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {\n");
    text.push_str(&format!(
        "    var color = vec4<f32>(uv, {tint:.3}, 1.0) * params.opacity;\n"
    ));
    for slot in channels {
        text.push_str(&format!(
            "    color = color + textureSample(channel{slot}, samp, uv);\n"
        ));
    }
    text.push_str("    return color;\n}\n");
    text
}

pub fn vertex_location() -> ShaderLocation {
    ShaderLocation::inline(vertex_wgsl(), ShaderLanguage::Wgsl)
}

pub fn fragment_location(channels: &[usize], tint: f32) -> ShaderLocation {
    ShaderLocation::inline(fragment_wgsl(channels, tint), ShaderLanguage::Wgsl)
}

pub fn compositor() -> ZoneCompositor<RecordingBackend> {
    ZoneCompositor::with_cache(RecordingBackend::new(), Arc::new(ShaderModuleCache::new()))
}

pub fn input(viewport: (u32, u32), time: f32) -> FrameInput<'static> {
    FrameInput {
        viewport,
        time,
        delta: 1.0 / 60.0,
        ..Default::default()
    }
}

// ── Op queries ──

pub fn writes(ops: &[Op]) -> Vec<(u64, usize)> {
    ops.iter()
        .filter_map(|op| match op {
            Op::WriteBuffer { offset, len, .. } => Some((*offset, *len)),
            _ => None,
        })
        .collect()
}

pub fn targets_created(ops: &[Op]) -> Vec<(u32, (u32, u32))> {
    ops.iter()
        .filter_map(|op| match op {
            Op::CreateTarget { id, size, .. } => Some((*id, *size)),
            _ => None,
        })
        .collect()
}

pub fn pipelines_created(ops: &[Op]) -> Vec<String> {
    ops.iter()
        .filter_map(|op| match op {
            Op::CreatePipeline { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect()
}

pub fn draws(ops: &[Op]) -> Vec<(DrawnTo, LoadAction, Bindings)> {
    ops.iter()
        .filter_map(|op| match op {
            Op::Draw {
                target,
                load,
                bindings,
                ..
            } => Some((*target, *load, *bindings)),
            _ => None,
        })
        .collect()
}

pub fn placeholder_id(ops: &[Op]) -> Option<u32> {
    ops.iter().find_map(|op| match op {
        Op::CreateTexture { id, label, .. } if label == "placeholder" => Some(*id),
        _ => None,
    })
}

// ── Temp files ──

pub fn unique_temp_dir(name: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic enough for tests")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("zonefx-{name}-{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub const VERTEX_GLSL: &str = r#"#version 450
layout(location = 0) in vec2 position;
layout(location = 1) in vec2 texcoord;
layout(location = 0) out vec2 v_uv;

layout(std140, set = 0, binding = 0) uniform ZoneUniforms {
    mat4 qt_Matrix;
    float qt_Opacity;
    float iTime;
    float iTimeDelta;
    int iFrame;
} ubuf;

void main() {
    v_uv = texcoord;
    gl_Position = ubuf.qt_Matrix * vec4(position, 0.0, 1.0);
}
"#;

pub const FRAGMENT_GLSL: &str = r#"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 fragColor;

layout(std140, set = 0, binding = 0) uniform ZoneUniforms {
    mat4 qt_Matrix;
    float qt_Opacity;
    float iTime;
    float iTimeDelta;
    int iFrame;
} ubuf;

layout(set = 0, binding = 1) uniform sampler samp;
layout(set = 0, binding = 3) uniform texture2D iChannel0;

void main() {
    vec4 prev = texture(sampler2D(iChannel0, samp), v_uv);
    fragColor = vec4(v_uv, 0.5 + 0.5 * sin(ubuf.iTime), 1.0) * ubuf.qt_Opacity + prev * 0.5;
}
"#;
