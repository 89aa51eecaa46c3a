//! Shader loading, baking and caching.

pub mod bake;
pub mod cache;
pub mod reflect;
pub mod source;
pub mod warm;

pub use bake::{BakeTarget, BakedCode, CompiledModule, bake};
pub use cache::{CACHE_CAPACITY, CacheEntry, CacheKey, CacheStats, ShaderModuleCache};
pub use reflect::{
    CHANNEL_BINDING_BASE, LABELS_BINDING, MAX_CHANNELS, SAMPLER_BINDING, ShaderInterface,
    UNIFORM_BINDING,
};
pub use source::{ShaderLanguage, ShaderLocation, ShaderSource, ShaderStage, SourceIdentity};
pub use warm::{ShaderWarmer, WarmReport};
