//! The zone compositor: shader lifecycle, parameter sync and frame execution.
//!
//! Nothing here panics or returns an error across the frame boundary. A frame
//! either draws or is skipped, and the last failure is kept as a status plus
//! a message for the host to poll.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use image::RgbaImage;

use crate::{
    backend::RenderBackend,
    effect::{EffectManifest, ParameterValue},
    error::{CompositorError, CompositorResult, CompositorStatus},
    params::{PARAMETER_BLOCK_SIZE, ParameterSynchronizer, ZoneRecord, block::CHANNEL_COUNT},
    pass_graph::{PassGraph, PassSpec},
    resources::{FrameResources, PassProgram},
    shader::{ShaderLocation, ShaderModuleCache, ShaderSource, ShaderStage, SourceIdentity},
};

/// Everything the host supplies per frame.
#[derive(Clone, Debug, Default)]
pub struct FrameInput<'a> {
    /// Host target size in pixels.
    pub viewport: (u32, u32),
    pub time: f32,
    pub delta: f32,
    pub frame: i32,
    pub mouse_px: [f32; 2],
    pub mouse_normalized: [f32; 2],
    pub zones: &'a [ZoneRecord],
    /// Leading custom float slots to overwrite; empty leaves them alone.
    pub custom_params: &'a [f32],
    /// Leading custom color slots to overwrite; empty leaves them alone.
    pub custom_colors: &'a [[f32; 4]],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoShaders,
    EmptyViewport,
    /// No working shader pair for the current configuration.
    ShadersUnavailable,
    /// A GPU object could not be created; retried next frame.
    ResourceCreation,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::NoShaders => "no shaders configured",
            SkipReason::EmptyViewport => "viewport is empty",
            SkipReason::ShadersUnavailable => "shaders unavailable",
            SkipReason::ResourceCreation => "GPU resource creation failed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Drawn,
    Skipped(SkipReason),
}

impl FrameOutcome {
    pub fn drawn(&self) -> bool {
        matches!(self, FrameOutcome::Drawn)
    }
}

#[derive(Clone, Debug)]
struct ShaderSet {
    vertex: ShaderLocation,
    fragment: ShaderLocation,
    /// Relative shader paths (including buffer passes) resolve here.
    base: Option<PathBuf>,
}

/// Baked programs for the current shader set and pass spec.
struct Programs {
    identities: Vec<SourceIdentity>,
    image: PassProgram,
    buffers: Vec<PassProgram>,
}

pub struct ZoneCompositor<B: RenderBackend> {
    backend: B,
    cache: Arc<ShaderModuleCache>,
    resources: FrameResources<B>,
    params: ParameterSynchronizer,
    shaders: Option<ShaderSet>,
    pass_spec: PassSpec,
    graph: PassGraph,
    programs: Option<Programs>,
    /// Set when shaders or the pass spec change; cleared by a successful bake.
    dirty: bool,
    /// Identities of the last failed bake. Never rebaked until one changes.
    failed: Option<Vec<SourceIdentity>>,
    status: CompositorStatus,
    last_error: Option<CompositorError>,
    /// A failed `load_effect`. Outlives successful frames of the previous
    /// effect until another effect loads or shaders are set directly.
    manifest_error: Option<CompositorError>,
    frame_counter: u64,
}

impl<B: RenderBackend> ZoneCompositor<B> {
    /// A compositor sharing the process-wide shader cache.
    pub fn new(backend: B) -> Self {
        Self::with_cache(backend, ShaderModuleCache::global())
    }

    pub fn with_cache(backend: B, cache: Arc<ShaderModuleCache>) -> Self {
        let pass_spec = PassSpec::image_only();
        Self {
            backend,
            cache,
            resources: FrameResources::new(),
            params: ParameterSynchronizer::new(),
            shaders: None,
            graph: PassGraph::build(&pass_spec),
            pass_spec,
            programs: None,
            dirty: false,
            failed: None,
            status: CompositorStatus::Null,
            last_error: None,
            manifest_error: None,
            frame_counter: 0,
        }
    }

    // ── Configuration ──

    /// Use shader files. Buffer shaders with relative paths resolve against
    /// the fragment shader's directory.
    pub fn set_shaders(&mut self, vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) {
        let fragment = fragment.into();
        let base = fragment.parent().map(Path::to_path_buf);
        self.set_shader_sources(
            ShaderLocation::File(vertex.into()),
            ShaderLocation::File(fragment),
            base,
        );
    }

    pub fn set_shader_sources(
        &mut self,
        vertex: ShaderLocation,
        fragment: ShaderLocation,
        base: Option<PathBuf>,
    ) {
        self.manifest_error = None;
        self.shaders = Some(ShaderSet {
            vertex,
            fragment,
            base,
        });
        self.dirty = true;
        if self.programs.is_none() {
            self.status = CompositorStatus::Loading;
        }
    }

    pub fn set_pass_spec(&mut self, spec: PassSpec) {
        if spec == self.pass_spec {
            return;
        }
        self.graph = PassGraph::build(&spec);
        self.pass_spec = spec;
        self.resources.invalidate_passes();
        self.frame_counter = 0;
        self.dirty = true;
        tracing::info!(topology = %self.graph.topology(), "pass graph changed");
    }

    /// Apply an effect directory (or manifest file): shaders, pass setup and
    /// parameter defaults. On failure the current effect keeps drawing but
    /// the status stays `Error` until a later load succeeds.
    pub fn load_effect(&mut self, path: impl AsRef<Path>) -> CompositorResult<EffectManifest> {
        let manifest = match EffectManifest::load(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                self.manifest_error = Some(e.clone());
                self.record_error(e.clone());
                return Err(e);
            }
        };
        self.set_shaders(manifest.vertex_path(), manifest.fragment_path());
        self.set_pass_spec(manifest.pass_spec());
        for value in manifest.parameter_defaults() {
            match value {
                ParameterValue::Float { slot, value } => {
                    self.params.set_custom_param(slot, value);
                }
                ParameterValue::Color { slot, rgba } => {
                    self.params.set_custom_color(slot, rgba);
                }
            }
        }
        tracing::info!(effect = %manifest.id, "loaded effect");
        Ok(manifest)
    }

    /// Premultiplied RGBA raster of the zone labels.
    pub fn set_labels(&mut self, labels: RgbaImage) {
        self.resources.set_labels(labels);
    }

    pub fn set_transform(&mut self, transform: [[f32; 4]; 4], opacity: f32) {
        self.params.set_transform(transform, opacity);
    }

    pub fn set_custom_param(&mut self, slot: usize, value: f32) -> bool {
        self.params.set_custom_param(slot, value)
    }

    pub fn set_custom_color(&mut self, slot: usize, rgba: [f32; 4]) -> bool {
        self.params.set_custom_color(slot, rgba)
    }

    /// Ask for a parameter upload on the next frame even if nothing changed.
    pub fn force_upload(&mut self) {
        self.params.force_upload();
    }

    // ── Status ──

    pub fn status(&self) -> CompositorStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == CompositorStatus::Ready
    }

    pub fn error_message(&self) -> Option<String> {
        self.last_error.as_ref().map(ToString::to_string)
    }

    pub fn last_error(&self) -> Option<&CompositorError> {
        self.last_error.as_ref()
    }

    pub fn pass_graph(&self) -> &PassGraph {
        &self.graph
    }

    pub fn pass_spec(&self) -> &PassSpec {
        &self.pass_spec
    }

    pub fn params(&self) -> &ParameterSynchronizer {
        &self.params
    }

    pub fn cache(&self) -> &Arc<ShaderModuleCache> {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Size of the buffer targets, once created.
    pub fn buffer_target_size(&self) -> Option<(u32, u32)> {
        self.resources.target_size()
    }

    // ── Frame ──

    pub fn render_frame(&mut self, target: &B::Target, input: &FrameInput<'_>) -> FrameOutcome {
        if self.shaders.is_none() {
            self.status = CompositorStatus::Null;
            return FrameOutcome::Skipped(SkipReason::NoShaders);
        }
        if input.viewport.0 == 0 || input.viewport.1 == 0 {
            return FrameOutcome::Skipped(SkipReason::EmptyViewport);
        }

        if self.dirty {
            self.refresh_programs();
        }
        let usable = self
            .programs
            .as_ref()
            .is_some_and(|p| p.buffers.len() == self.graph.buffer_passes().len());
        if !usable {
            return FrameOutcome::Skipped(SkipReason::ShadersUnavailable);
        }

        match self.draw_frame(target, input) {
            Ok(()) => {
                self.frame_counter += 1;
                if let Some(e) = &self.manifest_error {
                    self.status = CompositorStatus::Error;
                    self.last_error = Some(e.clone());
                } else if !self.dirty && self.failed.is_none() {
                    self.status = CompositorStatus::Ready;
                    self.last_error = None;
                }
                FrameOutcome::Drawn
            }
            Err(e) => {
                let reason = if e.is_transient() {
                    SkipReason::ResourceCreation
                } else {
                    SkipReason::ShadersUnavailable
                };
                self.record_error(e);
                FrameOutcome::Skipped(reason)
            }
        }
    }

    /// Drop every GPU object. The next frame recreates them and uploads the
    /// full parameter block.
    pub fn teardown(&mut self) {
        self.resources.teardown();
        self.params.reset();
        self.frame_counter = 0;
        tracing::debug!("compositor resources released");
    }

    /// Bake every shader pair if the source identities moved since the last
    /// attempt. Keeps the previous programs on failure.
    fn refresh_programs(&mut self) {
        let Some(shaders) = self.shaders.clone() else {
            return;
        };
        let base = shaders.base.as_deref();
        let buffers = self.pass_spec.buffers().to_vec();

        let identities = match probe_all(&shaders, &buffers) {
            Ok(identities) => identities,
            Err(e) => {
                self.record_error(e);
                return;
            }
        };
        if self.failed.as_ref() == Some(&identities) {
            return;
        }
        let current = self
            .programs
            .as_ref()
            .is_some_and(|p| p.identities == identities);
        if !current {
            match self.bake_programs(&shaders, base, &buffers, identities.clone()) {
                Ok(programs) => {
                    tracing::info!(
                        topology = %self.graph.topology(),
                        passes = programs.buffers.len() + 1,
                        "shaders ready"
                    );
                    self.programs = Some(programs);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "shader bake failed; keeping previous programs");
                    self.failed = Some(identities);
                    self.record_error(e);
                    return;
                }
            }
        }
        self.dirty = false;
        self.failed = None;
    }

    fn bake_programs(
        &self,
        shaders: &ShaderSet,
        base: Option<&Path>,
        buffers: &[ShaderLocation],
        identities: Vec<SourceIdentity>,
    ) -> CompositorResult<Programs> {
        let vertex = shaders.vertex.load(base, ShaderStage::Vertex)?;
        let fragment = shaders.fragment.load(base, ShaderStage::Fragment)?;
        let image = self.program(&vertex, &fragment)?;
        let buffers = buffers
            .iter()
            .map(|location| {
                let fragment = location.load(base, ShaderStage::Fragment)?;
                self.program(&vertex, &fragment)
            })
            .collect::<CompositorResult<Vec<_>>>()?;
        Ok(Programs {
            identities,
            image,
            buffers,
        })
    }

    fn program(&self, vertex: &ShaderSource, fragment: &ShaderSource) -> CompositorResult<PassProgram> {
        let entry = self.cache.bake_or_fetch(vertex, fragment)?;
        let interface = entry.bindable_interface(PARAMETER_BLOCK_SIZE)?;
        Ok(PassProgram { entry, interface })
    }

    /// Steps 2 to 6: targets, pipelines, bindings, upload, passes, submit.
    fn draw_frame(&mut self, target: &B::Target, input: &FrameInput<'_>) -> CompositorResult<()> {
        let Some(programs) = &self.programs else {
            return Err(CompositorError::mismatch("no baked programs"));
        };

        if self
            .resources
            .ensure_shared(&mut self.backend, self.pass_spec.wrap())?
        {
            self.params.reset();
        }
        self.resources.ensure_targets(
            &mut self.backend,
            &self.graph,
            input.viewport,
            self.pass_spec.scale(),
        )?;

        let parity = if self.graph.feedback() {
            (self.frame_counter % 2) as usize
        } else {
            0
        };
        let host_format = self.backend.target_format(target);
        for (plan, program) in self.graph.buffer_passes().iter().zip(&programs.buffers) {
            self.resources
                .ensure_pass(&mut self.backend, plan, program, host_format, parity)?;
        }
        self.resources.ensure_pass(
            &mut self.backend,
            self.graph.image_pass(),
            &programs.image,
            host_format,
            parity,
        )?;

        self.apply_input(input);
        let ranges = self.params.flush();
        if !ranges.is_empty() {
            tracing::trace!(?ranges, "uploading parameters");
        }
        self.resources
            .upload(&mut self.backend, self.params.block(), &ranges);

        self.resources
            .record_frame(&mut self.backend, &self.graph, target, parity)
    }

    fn apply_input(&mut self, input: &FrameInput<'_>) {
        let params = &mut self.params;
        params.set_timing(input.time, input.delta, input.frame);
        params.set_resolution(input.viewport.0 as f32, input.viewport.1 as f32);
        params.set_mouse(input.mouse_px, input.mouse_normalized);
        params.set_zones(input.zones);
        if !input.custom_params.is_empty() {
            params.set_custom_params(input.custom_params);
        }
        if !input.custom_colors.is_empty() {
            params.set_custom_colors(input.custom_colors);
        }

        let buffer_count = self.graph.buffer_passes().len();
        let size = self.resources.target_size().unwrap_or((1, 1));
        let channels: [(u32, u32); CHANNEL_COUNT] =
            std::array::from_fn(|slot| if slot < buffer_count { size } else { (1, 1) });
        params.set_channel_resolutions(channels);
    }

    fn record_error(&mut self, error: CompositorError) {
        let message = error.to_string();
        if self.error_message().as_deref() != Some(message.as_str()) {
            tracing::warn!(error = %message, "compositor error");
        }
        self.status = CompositorStatus::Error;
        self.last_error = Some(error);
    }
}

fn probe_all(
    shaders: &ShaderSet,
    buffers: &[ShaderLocation],
) -> CompositorResult<Vec<SourceIdentity>> {
    let base = shaders.base.as_deref();
    std::iter::once(&shaders.vertex)
        .chain(std::iter::once(&shaders.fragment))
        .chain(buffers)
        .map(|location| location.probe(base))
        .collect()
}
