//! Per-frame shader parameters and their GPU synchronization.

pub mod block;
pub mod sync;

pub use block::{
    CUSTOM_COLOR_COUNT, CUSTOM_PARAM_COUNT, MAX_ZONES, PARAMETER_BLOCK_SIZE, ParameterBlock,
    UploadRange, ZoneRecord,
};
pub use sync::{DirtyFlags, ParameterSynchronizer};
