//! Dirty tracking for the parameter block.
//!
//! Each mutator owns one sub-range of the block and only marks it dirty when
//! the stored value actually changes. [`ParameterSynchronizer::flush`] turns
//! the flags into the byte ranges the caller must upload.

use super::block::{
    CHANNEL_COUNT, CUSTOM_COLOR_COUNT, CUSTOM_PARAM_COUNT, MAX_ZONES, ParameterBlock,
    UploadRange, ZoneRecord,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub time: bool,
    pub scene: bool,
}

impl DirtyFlags {
    pub fn any(&self) -> bool {
        self.time || self.scene
    }
}

#[derive(Clone, Debug)]
pub struct ParameterSynchronizer {
    block: ParameterBlock,
    dirty: DirtyFlags,
    needs_full: bool,
    forced: bool,
}

impl Default for ParameterSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSynchronizer {
    pub fn new() -> Self {
        Self {
            block: ParameterBlock::default(),
            dirty: DirtyFlags::default(),
            needs_full: true,
            forced: false,
        }
    }

    pub fn block(&self) -> &ParameterBlock {
        &self.block
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    /// Whether the next flush uploads the whole block.
    pub fn needs_full_upload(&self) -> bool {
        self.needs_full
    }

    /// The GPU copy is gone (new buffer, teardown). Keeps the CPU values.
    pub fn reset(&mut self) {
        self.needs_full = true;
    }

    /// Request an upload even if nothing is dirty.
    pub fn force_upload(&mut self) {
        self.forced = true;
    }

    // ── Time range ──

    pub fn set_timing(&mut self, time: f32, delta: f32, frame: i32) -> bool {
        let b = &mut self.block;
        let changed = assign(&mut b.time, time) | assign(&mut b.time_delta, delta)
            | assign(&mut b.frame, frame);
        self.dirty.time |= changed;
        changed
    }

    pub fn set_transform(&mut self, transform: [[f32; 4]; 4], opacity: f32) -> bool {
        let b = &mut self.block;
        let changed = assign(&mut b.transform, transform) | assign(&mut b.opacity, opacity);
        self.dirty.time |= changed;
        changed
    }

    // ── Scene range ──

    pub fn set_resolution(&mut self, width: f32, height: f32) -> bool {
        self.mark_scene(|b| assign(&mut b.resolution, [width, height]))
    }

    pub fn set_mouse(&mut self, pixels: [f32; 2], normalized: [f32; 2]) -> bool {
        let mouse = [pixels[0], pixels[1], normalized[0], normalized[1]];
        self.mark_scene(|b| assign(&mut b.mouse, mouse))
    }

    /// Zones past [`MAX_ZONES`] are dropped; unused slots are zeroed.
    pub fn set_zones(&mut self, zones: &[ZoneRecord]) -> bool {
        if zones.len() > MAX_ZONES {
            tracing::warn!(
                zones = zones.len(),
                kept = MAX_ZONES,
                "too many zones; truncating"
            );
        }
        let zones = &zones[..zones.len().min(MAX_ZONES)];

        let mut rects = [[0.0; 4]; MAX_ZONES];
        let mut fill = [[0.0; 4]; MAX_ZONES];
        let mut border = [[0.0; 4]; MAX_ZONES];
        let mut params = [[0.0; 4]; MAX_ZONES];
        for (i, zone) in zones.iter().enumerate() {
            rects[i] = zone.rect;
            fill[i] = zone.fill;
            border[i] = zone.border;
            params[i] = zone.packed_params();
        }
        let count = zones.len() as i32;
        let highlighted = zones.iter().filter(|z| z.highlighted).count() as i32;

        self.mark_scene(|b| {
            assign(&mut b.zone_count, count)
                | assign(&mut b.highlighted_count, highlighted)
                | assign(&mut b.zone_rects, rects)
                | assign(&mut b.zone_fill, fill)
                | assign(&mut b.zone_border, border)
                | assign(&mut b.zone_params, params)
        })
    }

    /// Sets slots `0..values.len()`; extra values are ignored.
    pub fn set_custom_params(&mut self, values: &[f32]) -> bool {
        let mut packed = self.block.custom_params;
        for (slot, value) in values.iter().take(CUSTOM_PARAM_COUNT).enumerate() {
            packed[slot / 4][slot % 4] = *value;
        }
        self.mark_scene(|b| assign(&mut b.custom_params, packed))
    }

    pub fn set_custom_param(&mut self, slot: usize, value: f32) -> bool {
        if slot >= CUSTOM_PARAM_COUNT {
            return false;
        }
        self.mark_scene(|b| assign(&mut b.custom_params[slot / 4][slot % 4], value))
    }

    pub fn set_custom_colors(&mut self, colors: &[[f32; 4]]) -> bool {
        let mut packed = self.block.custom_colors;
        for (slot, color) in colors.iter().take(CUSTOM_COLOR_COUNT).enumerate() {
            packed[slot] = *color;
        }
        self.mark_scene(|b| assign(&mut b.custom_colors, packed))
    }

    pub fn set_custom_color(&mut self, slot: usize, color: [f32; 4]) -> bool {
        if slot >= CUSTOM_COLOR_COUNT {
            return false;
        }
        self.mark_scene(|b| assign(&mut b.custom_colors[slot], color))
    }

    /// Pixel sizes of the textures bound to `iChannel0..3`.
    pub fn set_channel_resolutions(&mut self, sizes: [(u32, u32); CHANNEL_COUNT]) -> bool {
        let rows = sizes.map(|(w, h)| [w as f32, h as f32, 1.0, 0.0]);
        self.mark_scene(|b| assign(&mut b.channel_resolution, rows))
    }

    /// Ranges to upload now. Clears the dirty flags.
    pub fn flush(&mut self) -> Vec<UploadRange> {
        let forced = std::mem::take(&mut self.forced);
        let dirty = std::mem::take(&mut self.dirty);

        if std::mem::take(&mut self.needs_full) {
            return vec![UploadRange::FULL];
        }

        let mut ranges = Vec::with_capacity(2);
        if dirty.time {
            ranges.push(UploadRange::TIME);
        }
        if dirty.scene {
            ranges.push(UploadRange::SCENE);
        }
        if ranges.is_empty() && forced {
            // Nothing says which range is stale.
            ranges.push(UploadRange::FULL);
        }
        ranges
    }

    fn mark_scene(&mut self, apply: impl FnOnce(&mut ParameterBlock) -> bool) -> bool {
        let changed = apply(&mut self.block);
        self.dirty.scene |= changed;
        changed
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
