//! Binding interface reflected from validated naga IR.
//!
//! Every pass uses a single bind group with a fixed slot assignment:
//!
//! | binding | resource |
//! |---|---|
//! | 0 | parameter block (uniform) |
//! | 1 | shared sampler |
//! | 2 | labels texture |
//! | 3..=6 | `iChannel0..3` |

use crate::error::{CompositorError, CompositorResult};

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;
pub const LABELS_BINDING: u32 = 2;
pub const CHANNEL_BINDING_BASE: u32 = 3;
pub const MAX_CHANNELS: usize = 4;

/// Which of the fixed bind-group slots a shader (or shader pair) declares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderInterface {
    /// Byte size of the uniform block at binding 0, if declared.
    pub uniform_block_size: Option<u32>,
    pub sampler: bool,
    pub labels: bool,
    pub channels: [bool; MAX_CHANNELS],
}

impl ShaderInterface {
    /// Reflect the bindings of `module`. Bindings outside the fixed slot
    /// table are reported in the returned issue list rather than failing,
    /// so that compiled modules stay cacheable.
    pub fn reflect(module: &naga::Module) -> (Self, Vec<String>) {
        let mut interface = ShaderInterface::default();
        let mut issues = Vec::new();

        for (_, var) in module.global_variables.iter() {
            let Some(rb) = &var.binding else {
                continue;
            };
            let name = var.name.as_deref().unwrap_or("<unnamed>");
            if rb.group != 0 {
                issues.push(format!(
                    "'{name}' uses bind group {} (only group 0 is bound)",
                    rb.group
                ));
                continue;
            }

            let inner = &module.types[var.ty].inner;
            match (rb.binding, var.space) {
                (UNIFORM_BINDING, naga::AddressSpace::Uniform) => {
                    interface.uniform_block_size = Some(inner.size(module.to_ctx()));
                }
                (SAMPLER_BINDING, naga::AddressSpace::Handle)
                    if matches!(inner, naga::TypeInner::Sampler { comparison: false }) =>
                {
                    interface.sampler = true;
                }
                (LABELS_BINDING, naga::AddressSpace::Handle) if is_float_2d(inner) => {
                    interface.labels = true;
                }
                (b, naga::AddressSpace::Handle)
                    if (CHANNEL_BINDING_BASE..CHANNEL_BINDING_BASE + MAX_CHANNELS as u32)
                        .contains(&b)
                        && is_float_2d(inner) =>
                {
                    interface.channels[(b - CHANNEL_BINDING_BASE) as usize] = true;
                }
                (b, space) => issues.push(format!(
                    "'{name}' at binding {b} ({space:?}) does not match the compositor slot layout"
                )),
            }
        }

        (interface, issues)
    }

    pub fn merge(self, other: ShaderInterface) -> ShaderInterface {
        let mut channels = self.channels;
        for (slot, declared) in channels.iter_mut().zip(other.channels) {
            *slot |= declared;
        }
        ShaderInterface {
            uniform_block_size: match (self.uniform_block_size, other.uniform_block_size) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
            sampler: self.sampler || other.sampler,
            labels: self.labels || other.labels,
            channels,
        }
    }

    pub fn declares_channel(&self, slot: usize) -> bool {
        self.channels.get(slot).copied().unwrap_or(false)
    }

    pub fn declares_any_channel(&self) -> bool {
        self.channels.iter().any(|c| *c)
    }

    /// Check that a vertex/fragment pair can be bound against a parameter
    /// block of `block_size` bytes.
    pub fn check_bindable(&self, block_size: u32) -> CompositorResult<()> {
        match self.uniform_block_size {
            None => Err(CompositorError::mismatch(
                "neither stage declares the parameter block at group 0, binding 0",
            )),
            Some(size) if size > block_size => Err(CompositorError::mismatch(format!(
                "uniform block is {size} bytes but the parameter block only provides {block_size}"
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Texture slots take a plain sampled `texture_2d<f32>`.
fn is_float_2d(inner: &naga::TypeInner) -> bool {
    matches!(
        inner,
        naga::TypeInner::Image {
            dim: naga::ImageDimension::D2,
            arrayed: false,
            class: naga::ImageClass::Sampled {
                kind: naga::ScalarKind::Float,
                multi: false,
            },
        }
    )
}
