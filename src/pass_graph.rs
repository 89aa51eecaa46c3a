//! Pass topology and per-pass channel wiring.
//!
//! A pass graph is a pure function of the [`PassSpec`]: it never looks at GPU
//! state, so changing the spec only requires dropping the derived resources.

use std::fmt;

use crate::shader::{MAX_CHANNELS, ShaderLocation};

pub const MAX_BUFFER_PASSES: usize = 4;
pub const MIN_BUFFER_SCALE: f32 = 0.125;
pub const MAX_BUFFER_SCALE: f32 = 1.0;

/// Sampler address mode used for every channel texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EdgeWrap {
    #[default]
    Clamp,
    Repeat,
}

/// Off-screen passes that run before the image pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PassSpec {
    buffers: Vec<ShaderLocation>,
    feedback: bool,
    scale: f32,
    wrap: EdgeWrap,
}

impl Default for PassSpec {
    fn default() -> Self {
        Self::image_only()
    }
}

impl PassSpec {
    pub fn image_only() -> Self {
        Self {
            buffers: Vec::new(),
            feedback: false,
            scale: MAX_BUFFER_SCALE,
            wrap: EdgeWrap::Clamp,
        }
    }

    /// Buffer passes run in the given order. Anything past
    /// [`MAX_BUFFER_PASSES`] is dropped.
    pub fn new(mut buffers: Vec<ShaderLocation>) -> Self {
        if buffers.len() > MAX_BUFFER_PASSES {
            tracing::warn!(
                requested = buffers.len(),
                kept = MAX_BUFFER_PASSES,
                "too many buffer passes; truncating"
            );
            buffers.truncate(MAX_BUFFER_PASSES);
        }
        Self {
            buffers,
            ..Self::image_only()
        }
    }

    /// Only meaningful with exactly one buffer pass.
    pub fn with_feedback(mut self, feedback: bool) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = clamp_scale(scale);
        self
    }

    pub fn with_wrap(mut self, wrap: EdgeWrap) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn buffers(&self) -> &[ShaderLocation] {
        &self.buffers
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn feedback(&self) -> bool {
        self.feedback
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn wrap(&self) -> EdgeWrap {
        self.wrap
    }
}

pub fn clamp_scale(scale: f32) -> f32 {
    if scale.is_nan() {
        return MAX_BUFFER_SCALE;
    }
    scale.clamp(MIN_BUFFER_SCALE, MAX_BUFFER_SCALE)
}

/// Pixel size of a buffer target: `max(1, floor(viewport * scale))` per axis.
pub fn target_size(viewport: (u32, u32), scale: f32) -> (u32, u32) {
    let scale = clamp_scale(scale) as f64;
    let axis = |v: u32| ((v as f64 * scale).floor() as u32).max(1);
    (axis(viewport.0), axis(viewport.1))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    ImageOnly,
    SingleBuffer { feedback: bool },
    Chain { passes: usize },
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::ImageOnly => f.write_str("image-only"),
            Topology::SingleBuffer { feedback: false } => f.write_str("single-buffer"),
            Topology::SingleBuffer { feedback: true } => f.write_str("single-buffer+feedback"),
            Topology::Chain { passes } => write!(f, "chain({passes})"),
        }
    }
}

/// What a channel slot samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelSource {
    /// The texture buffer pass `i` wrote this frame.
    PassOutput(usize),
    /// The feedback texture written on the previous frame.
    PreviousFrame,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    Buffer(usize),
    Image,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassKind::Buffer(i) => write!(f, "buffer{i}"),
            PassKind::Image => f.write_str("image"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassPlan {
    pub kind: PassKind,
    pub channels: [Option<ChannelSource>; MAX_CHANNELS],
}

impl PassPlan {
    fn new(kind: PassKind) -> Self {
        Self {
            kind,
            channels: [None; MAX_CHANNELS],
        }
    }

    pub fn channel(&self, slot: usize) -> Option<ChannelSource> {
        self.channels.get(slot).copied().flatten()
    }

    pub fn samples_previous_frame(&self) -> bool {
        self.channels.contains(&Some(ChannelSource::PreviousFrame))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassGraph {
    topology: Topology,
    buffers: Vec<PassPlan>,
    image: PassPlan,
}

impl PassGraph {
    pub fn build(spec: &PassSpec) -> Self {
        let count = spec.buffer_count().min(MAX_BUFFER_PASSES);
        let topology = match count {
            0 => Topology::ImageOnly,
            1 => Topology::SingleBuffer {
                feedback: spec.feedback(),
            },
            passes => Topology::Chain { passes },
        };

        let mut buffers: Vec<PassPlan> = (0..count)
            .map(|i| PassPlan::new(PassKind::Buffer(i)))
            .collect();
        let mut image = PassPlan::new(PassKind::Image);

        match topology {
            Topology::ImageOnly => {}
            Topology::SingleBuffer { feedback } => {
                if feedback {
                    buffers[0].channels[0] = Some(ChannelSource::PreviousFrame);
                }
                image.channels[0] = Some(ChannelSource::PassOutput(0));
            }
            Topology::Chain { passes } => {
                for (i, pass) in buffers.iter_mut().enumerate() {
                    for j in 0..i {
                        pass.channels[j] = Some(ChannelSource::PassOutput(j));
                    }
                }
                for j in 0..passes {
                    image.channels[j] = Some(ChannelSource::PassOutput(j));
                }
            }
        }

        Self {
            topology,
            buffers,
            image,
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn buffer_passes(&self) -> &[PassPlan] {
        &self.buffers
    }

    pub fn image_pass(&self) -> &PassPlan {
        &self.image
    }

    pub fn feedback(&self) -> bool {
        matches!(self.topology, Topology::SingleBuffer { feedback: true })
    }

    /// Buffer passes followed by the image pass, in execution order.
    pub fn passes(&self) -> impl Iterator<Item = &PassPlan> {
        self.buffers.iter().chain(std::iter::once(&self.image))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::shader::ShaderLanguage;

    fn buffers(n: usize) -> Vec<ShaderLocation> {
        (0..n)
            .map(|i| ShaderLocation::file(format!("buffer_{i}.frag")))
            .collect()
    }

    #[test]
    fn empty_spec_is_image_only() {
        let graph = PassGraph::build(&PassSpec::image_only());
        assert_eq!(graph.topology(), Topology::ImageOnly);
        assert!(graph.buffer_passes().is_empty());
        assert_eq!(graph.image_pass().channels, [None; MAX_CHANNELS]);
    }

    #[test]
    fn single_buffer_without_feedback() {
        let graph = PassGraph::build(&PassSpec::new(buffers(1)));
        assert_eq!(graph.topology(), Topology::SingleBuffer { feedback: false });
        assert!(!graph.feedback());
        assert_eq!(graph.buffer_passes()[0].channels, [None; MAX_CHANNELS]);
        assert_eq!(
            graph.image_pass().channel(0),
            Some(ChannelSource::PassOutput(0))
        );
    }

    #[test]
    fn single_buffer_with_feedback_samples_previous_frame() {
        let graph = PassGraph::build(&PassSpec::new(buffers(1)).with_feedback(true));
        assert!(graph.feedback());
        let pass = &graph.buffer_passes()[0];
        assert_eq!(pass.channel(0), Some(ChannelSource::PreviousFrame));
        assert!(pass.samples_previous_frame());
        assert_eq!(
            graph.image_pass().channel(0),
            Some(ChannelSource::PassOutput(0))
        );
        assert!(!graph.image_pass().samples_previous_frame());
    }

    #[test]
    fn chain_ignores_feedback_flag() {
        let graph = PassGraph::build(&PassSpec::new(buffers(3)).with_feedback(true));
        assert_eq!(graph.topology(), Topology::Chain { passes: 3 });
        assert!(!graph.feedback());
        assert!(graph.passes().all(|p| !p.samples_previous_frame()));
    }

    #[test]
    fn three_pass_chain_wiring() {
        let graph = PassGraph::build(&PassSpec::new(buffers(3)));
        let p = graph.buffer_passes();
        assert_eq!(p[0].channels, [None; MAX_CHANNELS]);
        assert_eq!(
            p[2].channels,
            [
                Some(ChannelSource::PassOutput(0)),
                Some(ChannelSource::PassOutput(1)),
                None,
                None
            ]
        );
        assert_eq!(
            graph.image_pass().channels,
            [
                Some(ChannelSource::PassOutput(0)),
                Some(ChannelSource::PassOutput(1)),
                Some(ChannelSource::PassOutput(2)),
                None
            ]
        );
    }

    #[test]
    fn more_than_four_buffers_are_truncated() {
        let spec = PassSpec::new(buffers(6));
        assert_eq!(spec.buffer_count(), MAX_BUFFER_PASSES);
        assert_eq!(spec.buffers()[3], ShaderLocation::file("buffer_3.frag"));
        let graph = PassGraph::build(&spec);
        assert_eq!(graph.topology(), Topology::Chain { passes: 4 });
    }

    #[test]
    fn scale_is_clamped() {
        assert_eq!(clamp_scale(f32::NAN), 1.0);
        assert_eq!(clamp_scale(0.01), MIN_BUFFER_SCALE);
        assert_eq!(clamp_scale(3.0), 1.0);
        assert_eq!(clamp_scale(0.5), 0.5);
        let spec = PassSpec::new(vec![ShaderLocation::inline("", ShaderLanguage::Glsl)])
            .with_scale(f32::NAN);
        assert_eq!(spec.scale(), 1.0);
    }

    #[test]
    fn target_size_floors_and_never_hits_zero() {
        assert_eq!(target_size((1920, 1080), 0.5), (960, 540));
        assert_eq!(target_size((801, 601), 0.5), (400, 300));
        assert_eq!(target_size((0, 3), 0.125), (1, 1));
    }

    proptest! {
        #[test]
        fn chain_pass_never_samples_itself_or_later(n in 2usize..=4) {
            let graph = PassGraph::build(&PassSpec::new(buffers(n)));
            for (i, pass) in graph.buffer_passes().iter().enumerate() {
                for source in pass.channels.iter().flatten() {
                    match source {
                        ChannelSource::PassOutput(j) => prop_assert!(*j < i),
                        ChannelSource::PreviousFrame => prop_assert!(false, "chain uses feedback"),
                    }
                }
            }
        }

        #[test]
        fn target_size_matches_formula(w in 0u32..8192, h in 0u32..8192, scale in 0.0f32..2.0) {
            let s = clamp_scale(scale) as f64;
            let (tw, th) = target_size((w, h), scale);
            prop_assert_eq!(tw, ((w as f64 * s).floor() as u32).max(1));
            prop_assert_eq!(th, ((h as f64 * s).floor() as u32).max(1));
            prop_assert!(tw <= w.max(1) && th <= h.max(1));
        }
    }
}
