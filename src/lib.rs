//! Multi-pass shader compositor for animated zone overlays.
//!
//! A [`ZoneCompositor`] bakes a vertex + fragment shader pair (plus up to four
//! buffer passes) through a process-wide cache, keeps a large uniform block in
//! sync with the GPU and draws the pass chain onto a host-provided target
//! every frame.

pub mod backend;
pub mod compositor;
pub mod effect;
pub mod error;
pub mod params;
pub mod pass_graph;
pub mod resources;
pub mod shader;

pub use backend::{RenderBackend, WgpuBackend, WgpuTarget};
pub use compositor::{FrameInput, FrameOutcome, SkipReason, ZoneCompositor};
pub use effect::EffectManifest;
pub use error::{CompositorError, CompositorResult, CompositorStatus};
pub use params::ZoneRecord;
pub use pass_graph::{EdgeWrap, PassSpec};
pub use shader::{ShaderLanguage, ShaderLocation, ShaderModuleCache};
