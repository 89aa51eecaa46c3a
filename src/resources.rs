//! Lazily created GPU objects for one compositor.
//!
//! Every object is an owned backend handle held in an `Option`; dropping it
//! releases the GPU allocation, so invalidation is just assigning `None`.
//! Pipelines are keyed by (shader pair, target format). Binding sets hang off
//! their pipeline, one per frame parity when feedback alternates textures.

use std::sync::Arc;

use image::RgbaImage;
use wgpu::TextureFormat;

use crate::{
    backend::{
        BUFFER_TARGET_FORMAT, BindingsDesc, BlendMode, DrawCall, DrawTarget, LoadAction,
        PipelineDesc, QUAD_VERTICES, RenderBackend,
    },
    error::{CompositorError, CompositorResult},
    params::{PARAMETER_BLOCK_SIZE, ParameterBlock, UploadRange},
    pass_graph::{ChannelSource, EdgeWrap, PassGraph, PassKind, PassPlan, target_size},
    shader::{CacheEntry, CacheKey, MAX_CHANNELS, ShaderInterface},
};

/// A baked shader pair plus the interface it was validated against.
#[derive(Clone, Debug)]
pub struct PassProgram {
    pub entry: Arc<CacheEntry>,
    pub interface: ShaderInterface,
}

struct PassTargets<T> {
    size: (u32, u32),
    /// One texture, or a ping-pong pair under feedback.
    textures: Vec<T>,
}

impl<T> PassTargets<T> {
    fn written(&self, parity: usize) -> Option<&T> {
        self.textures.get(parity % self.textures.len().max(1))
    }

    fn previous(&self, parity: usize) -> Option<&T> {
        self.textures.get((parity + 1) % self.textures.len().max(1))
    }
}

struct PipelineSlot<B: RenderBackend> {
    key: CacheKey,
    format: TextureFormat,
    pipeline: B::Pipeline,
    bindings: [Option<B::Bindings>; 2],
}

struct LabelsTexture<T> {
    texture: T,
    size: (u32, u32),
}

pub struct FrameResources<B: RenderBackend> {
    vertices: Option<B::Buffer>,
    uniform: Option<B::Buffer>,
    sampler: Option<(EdgeWrap, B::Sampler)>,
    placeholder: Option<B::Texture>,
    labels: Option<LabelsTexture<B::Texture>>,
    labels_image: Option<RgbaImage>,
    labels_dirty: bool,
    targets: Vec<PassTargets<B::Texture>>,
    buffer_slots: Vec<Option<PipelineSlot<B>>>,
    image_slot: Option<PipelineSlot<B>>,
    pending_clear: bool,
}

impl<B: RenderBackend> Default for FrameResources<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RenderBackend> FrameResources<B> {
    pub fn new() -> Self {
        Self {
            vertices: None,
            uniform: None,
            sampler: None,
            placeholder: None,
            labels: None,
            labels_image: None,
            labels_dirty: false,
            targets: Vec::new(),
            buffer_slots: Vec::new(),
            image_slot: None,
            pending_clear: false,
        }
    }

    /// Store the labels raster; it is uploaded on the next frame.
    pub fn set_labels(&mut self, image: RgbaImage) {
        self.labels_image = Some(image);
        self.labels_dirty = true;
    }

    /// Pixel size of the buffer targets, if any exist.
    pub fn target_size(&self) -> Option<(u32, u32)> {
        self.targets.first().map(|t| t.size)
    }

    pub fn has_uniform_buffer(&self) -> bool {
        self.uniform.is_some()
    }

    /// Create the objects every pass shares. Returns true when the uniform
    /// buffer was (re)created, i.e. its contents are undefined.
    pub fn ensure_shared(&mut self, backend: &mut B, wrap: EdgeWrap) -> CompositorResult<bool> {
        if self.vertices.is_none() {
            let bytes: &[u8] = bytemuck::cast_slice(QUAD_VERTICES.as_slice());
            self.vertices = Some(backend.create_vertex_buffer("fullscreen quad", bytes)?);
            tracing::debug!("created fullscreen quad");
        }

        let mut fresh_uniform = false;
        if self.uniform.is_none() {
            self.uniform = Some(
                backend.create_uniform_buffer("parameter block", PARAMETER_BLOCK_SIZE as u64)?,
            );
            fresh_uniform = true;
            self.drop_bindings();
            tracing::debug!(size = PARAMETER_BLOCK_SIZE, "created parameter buffer");
        }

        if !matches!(&self.sampler, Some((current, _)) if *current == wrap) {
            self.sampler = None;
            self.drop_bindings();
            self.sampler = Some((wrap, backend.create_sampler(wrap)?));
            tracing::debug!(?wrap, "created channel sampler");
        }

        if self.placeholder.is_none() {
            self.placeholder = Some(backend.create_texture_rgba("placeholder", (1, 1), &[0; 4])?);
        }

        self.ensure_labels(backend)?;
        Ok(fresh_uniform)
    }

    fn ensure_labels(&mut self, backend: &mut B) -> CompositorResult<()> {
        if !self.labels_dirty {
            return Ok(());
        }
        let Some(image) = self.labels_image.take() else {
            self.labels_dirty = false;
            return Ok(());
        };
        let uploaded = self.upload_labels(backend, &image);
        self.labels_image = Some(image);
        uploaded?;
        self.labels_dirty = false;
        Ok(())
    }

    fn upload_labels(&mut self, backend: &mut B, image: &RgbaImage) -> CompositorResult<()> {
        let size = image.dimensions();
        if size.0 == 0 || size.1 == 0 {
            // Nothing to label: shaders sample the placeholder instead.
            if self.labels.take().is_some() {
                self.drop_bindings();
            }
            tracing::debug!(?size, "empty labels raster, binding placeholder");
            return Ok(());
        }
        if let Some(labels) = &self.labels {
            if labels.size == size {
                backend.write_texture_rgba(&labels.texture, size, image.as_raw());
                return Ok(());
            }
        }
        self.labels = None;
        self.drop_bindings();
        let texture = backend.create_texture_rgba("labels", size, image.as_raw())?;
        self.labels = Some(LabelsTexture { texture, size });
        tracing::debug!(?size, "created labels texture");
        Ok(())
    }

    /// Size the buffer targets for `viewport * scale`. Targets are only
    /// recreated when that size or the topology changes.
    pub fn ensure_targets(
        &mut self,
        backend: &mut B,
        graph: &PassGraph,
        viewport: (u32, u32),
        scale: f32,
    ) -> CompositorResult<()> {
        let count = graph.buffer_passes().len();
        let per_pass = if graph.feedback() { 2 } else { 1 };
        if self.targets.len() != count
            || self.targets.iter().any(|t| t.textures.len() != per_pass)
        {
            self.targets.clear();
            self.drop_bindings();
        }

        let size = target_size(viewport, scale);
        for i in 0..count {
            if self.targets.get(i).is_some_and(|t| t.size == size) {
                continue;
            }
            let mut textures = Vec::with_capacity(per_pass);
            for side in 0..per_pass {
                let label = format!("buffer{i} target {side}");
                textures.push(backend.create_render_target(&label, size, BUFFER_TARGET_FORMAT)?);
            }
            tracing::debug!(pass = i, ?size, "created buffer target");
            let targets = PassTargets { size, textures };
            match self.targets.get_mut(i) {
                Some(slot) => *slot = targets,
                None => self.targets.push(targets),
            }
            self.drop_bindings();
            if per_pass == 2 {
                self.pending_clear = true;
            }
        }
        Ok(())
    }

    /// Create the pipeline and the binding set `pass` needs for `parity`.
    pub fn ensure_pass(
        &mut self,
        backend: &mut B,
        plan: &PassPlan,
        program: &PassProgram,
        host_format: TextureFormat,
        parity: usize,
    ) -> CompositorResult<()> {
        let (format, blend) = match plan.kind {
            PassKind::Buffer(_) => (BUFFER_TARGET_FORMAT, BlendMode::Replace),
            PassKind::Image => (host_format, BlendMode::PremultipliedOver),
        };
        let label = plan.kind.to_string();

        let slot = match plan.kind {
            PassKind::Buffer(i) => {
                if self.buffer_slots.len() <= i {
                    self.buffer_slots.resize_with(i + 1, || None);
                }
                &mut self.buffer_slots[i]
            }
            PassKind::Image => &mut self.image_slot,
        };

        if slot
            .as_ref()
            .is_some_and(|s| s.key != *program.entry.key() || s.format != format)
        {
            tracing::debug!(pass = %label, ?format, "rebuilding pipeline");
            *slot = None;
        }
        if slot.is_none() {
            let pipeline = backend.create_pipeline(&PipelineDesc {
                label: &label,
                vertex: program.entry.vertex(),
                fragment: program.entry.fragment(),
                interface: program.interface,
                format,
                blend,
            })?;
            tracing::debug!(pass = %label, ?format, "created pipeline");
            *slot = Some(PipelineSlot {
                key: program.entry.key().clone(),
                format,
                pipeline,
                bindings: [None, None],
            });
        }
        let Some(slot) = slot.as_mut() else {
            return Err(CompositorError::resource(&label, "pipeline slot empty"));
        };

        let parity = parity % 2;
        if slot.bindings[parity].is_some() {
            return Ok(());
        }

        let (Some(uniform), Some((_, sampler)), Some(placeholder)) =
            (&self.uniform, &self.sampler, &self.placeholder)
        else {
            return Err(CompositorError::resource(
                &label,
                "shared resources missing while binding",
            ));
        };
        let labels = self.labels.as_ref().map_or(placeholder, |l| &l.texture);
        let channels =
            channel_textures(&self.targets, placeholder, plan, &program.interface, parity)
                .map_err(|message| CompositorError::resource(&label, message))?;

        let bindings = backend.create_bindings(&BindingsDesc {
            label: &label,
            pipeline: &slot.pipeline,
            interface: program.interface,
            uniform,
            sampler,
            labels,
            channels,
        })?;
        slot.bindings[parity] = Some(bindings);
        Ok(())
    }

    pub fn upload(&self, backend: &mut B, block: &ParameterBlock, ranges: &[UploadRange]) {
        let Some(uniform) = &self.uniform else {
            return;
        };
        for range in ranges {
            backend.write_buffer(uniform, range.offset as u64, range.slice(block));
        }
    }

    /// Record and submit every pass of `graph`.
    pub fn record_frame(
        &mut self,
        backend: &mut B,
        graph: &PassGraph,
        host: &B::Target,
        parity: usize,
    ) -> CompositorResult<()> {
        let parity = parity % 2;
        let vertices = self
            .vertices
            .as_ref()
            .ok_or_else(|| CompositorError::resource("fullscreen quad", "not created"))?;

        let mut calls: Vec<DrawCall<'_, B>> = Vec::with_capacity(graph.buffer_passes().len() + 1);
        for plan in graph.passes() {
            let slot = match plan.kind {
                PassKind::Buffer(i) => self.buffer_slots.get(i).and_then(Option::as_ref),
                PassKind::Image => self.image_slot.as_ref(),
            };
            let Some(slot) = slot else {
                return Err(CompositorError::resource(plan.kind.to_string(), "no pipeline"));
            };
            let Some(bindings) = slot.bindings[parity].as_ref() else {
                return Err(CompositorError::resource(plan.kind.to_string(), "no bindings"));
            };
            let (target, load) = match plan.kind {
                PassKind::Buffer(i) => {
                    let texture = self
                        .targets
                        .get(i)
                        .and_then(|t| t.written(parity))
                        .ok_or_else(|| {
                            CompositorError::resource(plan.kind.to_string(), "no target")
                        })?;
                    (DrawTarget::Offscreen(texture), LoadAction::Clear)
                }
                PassKind::Image => (DrawTarget::Host(host), LoadAction::Load),
            };
            calls.push(DrawCall {
                label: match plan.kind {
                    PassKind::Buffer(_) => "buffer pass",
                    PassKind::Image => "image pass",
                },
                target,
                load,
                pipeline: &slot.pipeline,
                bindings,
                vertices,
            });
        }

        backend.begin_frame();
        if self.pending_clear {
            for texture in self.targets.iter().flat_map(|t| t.textures.iter()) {
                backend.clear(texture);
            }
        }
        for call in &calls {
            backend.draw(call);
        }
        backend.submit();
        drop(calls);

        self.pending_clear = false;
        Ok(())
    }

    /// Drop everything derived from the pass graph. Shared objects survive.
    pub fn invalidate_passes(&mut self) {
        self.targets.clear();
        self.buffer_slots.clear();
        self.image_slot = None;
        self.pending_clear = false;
    }

    /// Release every GPU object. The labels raster is kept and re-uploaded.
    pub fn teardown(&mut self) {
        self.invalidate_passes();
        self.vertices = None;
        self.uniform = None;
        self.sampler = None;
        self.placeholder = None;
        self.labels = None;
        self.labels_dirty = self.labels_image.is_some();
    }

    fn drop_bindings(&mut self) {
        for slot in self.buffer_slots.iter_mut().chain(std::iter::once(&mut self.image_slot)) {
            if let Some(slot) = slot {
                slot.bindings = [None, None];
            }
        }
    }
}

fn channel_textures<'a, T>(
    targets: &'a [PassTargets<T>],
    placeholder: &'a T,
    plan: &PassPlan,
    interface: &ShaderInterface,
    parity: usize,
) -> Result<[Option<&'a T>; MAX_CHANNELS], String> {
    let mut out = [None; MAX_CHANNELS];
    for (slot, bound) in out.iter_mut().enumerate() {
        if !interface.declares_channel(slot) {
            continue;
        }
        let texture = match plan.channel(slot) {
            None => placeholder,
            Some(ChannelSource::PassOutput(i)) => targets
                .get(i)
                .and_then(|t| t.written(parity))
                .ok_or_else(|| format!("channel {slot} reads missing buffer{i}"))?,
            Some(ChannelSource::PreviousFrame) => targets
                .first()
                .and_then(|t| t.previous(parity))
                .ok_or_else(|| format!("channel {slot} reads a missing feedback target"))?,
        };
        *bound = Some(texture);
    }
    Ok(out)
}
