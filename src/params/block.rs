//! The uniform block shared by every pass.
//!
//! Layout follows std140 so the same bytes bind unchanged on every backend.
//! Everything is a 16-byte row (`vec4`, or four scalars packed into one), so
//! there is no implicit padding and the struct can be `Pod`.

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};

pub const MAX_ZONES: usize = 64;
pub const CUSTOM_PARAM_COUNT: usize = 16;
pub const CUSTOM_COLOR_COUNT: usize = 8;
pub const CHANNEL_COUNT: usize = 4;

pub const PARAMETER_BLOCK_SIZE: u32 = 4464;
pub const PARAMETER_BLOCK_BUDGET: u32 = 8 * 1024;

/// End of the per-frame header (transform, opacity and timing).
const TIME_END: u32 = 80;

pub const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParameterBlock {
    /// `qt_Matrix`, column-major.
    pub transform: [[f32; 4]; 4],
    pub opacity: f32,
    pub time: f32,
    pub time_delta: f32,
    pub frame: i32,
    pub resolution: [f32; 2],
    pub zone_count: i32,
    pub highlighted_count: i32,
    /// xy in pixels, zw normalized to the viewport.
    pub mouse: [f32; 4],
    pub custom_params: [[f32; 4]; CUSTOM_PARAM_COUNT / 4],
    pub custom_colors: [[f32; 4]; CUSTOM_COLOR_COUNT],
    /// xy = pixel size of each channel texture.
    pub channel_resolution: [[f32; 4]; CHANNEL_COUNT],
    /// x, y, width, height.
    pub zone_rects: [[f32; 4]; MAX_ZONES],
    pub zone_fill: [[f32; 4]; MAX_ZONES],
    pub zone_border: [[f32; 4]; MAX_ZONES],
    /// border radius, border width, highlighted (0/1), zone number.
    pub zone_params: [[f32; 4]; MAX_ZONES],
}

const _: () = assert!(size_of::<ParameterBlock>() == PARAMETER_BLOCK_SIZE as usize);
const _: () = assert!(PARAMETER_BLOCK_SIZE <= PARAMETER_BLOCK_BUDGET);
const _: () = assert!(offset_of!(ParameterBlock, resolution) == TIME_END as usize);
const _: () = assert!(offset_of!(ParameterBlock, custom_params) == 112);
const _: () = assert!(offset_of!(ParameterBlock, zone_rects) == 368);
const _: () = assert!(offset_of!(ParameterBlock, zone_params) == 3440);

impl Default for ParameterBlock {
    fn default() -> Self {
        let mut block = Self::zeroed();
        block.transform = IDENTITY;
        block.opacity = 1.0;
        block
    }
}

impl ParameterBlock {
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn custom_param(&self, slot: usize) -> Option<f32> {
        (slot < CUSTOM_PARAM_COUNT).then(|| self.custom_params[slot / 4][slot % 4])
    }
}

/// One zone as the host describes it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ZoneRecord {
    pub rect: [f32; 4],
    pub fill: [f32; 4],
    pub border: [f32; 4],
    pub border_radius: f32,
    pub border_width: f32,
    pub highlighted: bool,
    pub number: i32,
}

impl ZoneRecord {
    pub(crate) fn packed_params(&self) -> [f32; 4] {
        [
            self.border_radius,
            self.border_width,
            if self.highlighted { 1.0 } else { 0.0 },
            self.number as f32,
        ]
    }
}

/// A byte range of the parameter block to copy into the uniform buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UploadRange {
    pub offset: u32,
    pub size: u32,
}

impl UploadRange {
    pub const TIME: UploadRange = UploadRange {
        offset: 0,
        size: TIME_END,
    };
    pub const SCENE: UploadRange = UploadRange {
        offset: TIME_END,
        size: PARAMETER_BLOCK_SIZE - TIME_END,
    };
    pub const FULL: UploadRange = UploadRange {
        offset: 0,
        size: PARAMETER_BLOCK_SIZE,
    };

    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    pub fn slice<'a>(&self, block: &'a ParameterBlock) -> &'a [u8] {
        &block.as_bytes()[self.offset as usize..self.end() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_offsets_match_shader_layout() {
        assert_eq!(offset_of!(ParameterBlock, opacity), 64);
        assert_eq!(offset_of!(ParameterBlock, time), 68);
        assert_eq!(offset_of!(ParameterBlock, time_delta), 72);
        assert_eq!(offset_of!(ParameterBlock, frame), 76);
        assert_eq!(offset_of!(ParameterBlock, resolution), 80);
        assert_eq!(offset_of!(ParameterBlock, zone_count), 88);
        assert_eq!(offset_of!(ParameterBlock, highlighted_count), 92);
        assert_eq!(offset_of!(ParameterBlock, mouse), 96);
    }

    #[test]
    fn array_offsets_match_shader_layout() {
        assert_eq!(offset_of!(ParameterBlock, custom_params), 112);
        assert_eq!(offset_of!(ParameterBlock, custom_colors), 176);
        assert_eq!(offset_of!(ParameterBlock, channel_resolution), 304);
        assert_eq!(offset_of!(ParameterBlock, zone_rects), 368);
        assert_eq!(offset_of!(ParameterBlock, zone_fill), 1392);
        assert_eq!(offset_of!(ParameterBlock, zone_border), 2416);
        assert_eq!(offset_of!(ParameterBlock, zone_params), 3440);
    }

    #[test]
    fn ranges_partition_the_block() {
        assert_eq!(UploadRange::TIME.offset, 0);
        assert_eq!(UploadRange::TIME.end(), UploadRange::SCENE.offset);
        assert_eq!(UploadRange::SCENE.end(), PARAMETER_BLOCK_SIZE);
        assert_eq!(UploadRange::FULL.size, PARAMETER_BLOCK_SIZE);
    }

    #[test]
    fn default_block_is_identity_and_opaque() {
        let block = ParameterBlock::default();
        assert_eq!(block.transform, IDENTITY);
        assert_eq!(block.opacity, 1.0);
        assert_eq!(block.zone_count, 0);
        assert_eq!(block.as_bytes().len(), PARAMETER_BLOCK_SIZE as usize);
    }

    #[test]
    fn time_slice_starts_with_transform() {
        let block = ParameterBlock::default();
        let bytes = UploadRange::TIME.slice(&block);
        assert_eq!(bytes.len(), 80);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[64..68], &1.0f32.to_ne_bytes());
    }
}
