// ============================================================================
// BRUSH STAMP ENGINE – cached circular stamps + stroke stepping
// ============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use egui::{Color32, Pos2};
use image::{Rgba, RgbaImage};

use crate::canvas::{BlendMode, TiledImage};
use crate::ops::shapes::{sdf_line_segment, smoothstep};

/// Largest stamp side in logical pixels.
pub const MAX_STAMP_SIDE: u32 = 128;

/// Stamps are not stepped more than this many times per segment.
const MAX_STEPS_PER_SEGMENT: u32 = 20;

/// Immutable pre-rendered brush tip.  The disc of diameter `size` sits in the
/// middle of a square of side `side`.
#[derive(Debug)]
pub struct BrushStamp {
    pub side: u32,
    pub radius: f32,
    pub pixels: RgbaImage,
}

impl BrushStamp {
    pub fn alpha_at(&self, x: u32, y: u32) -> u8 {
        self.pixels.get_pixel(x, y)[3]
    }
}

/// Cache key: parameters after rounding, so near-identical requests share a stamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StampKey {
    pub size: u32,
    /// Hardness rounded to one decimal, stored in tenths.
    pub hardness_tenths: u8,
    pub color: [u8; 3],
}

impl StampKey {
    pub fn new(size: f32, hardness: f32, color: Color32) -> Self {
        Self {
            size: size.max(0.0).round() as u32,
            hardness_tenths: (hardness.clamp(0.0, 1.0) * 10.0).round() as u8,
            color: [color.r(), color.g(), color.b()],
        }
    }

    pub fn hardness(&self) -> f32 {
        self.hardness_tenths as f32 / 10.0
    }
}

/// Render a stamp for `key`.
pub fn build_stamp(key: StampKey) -> BrushStamp {
    let side = key.size.saturating_mul(2).min(MAX_STAMP_SIDE);
    let center = (side / 2) as f32;
    let radius = key.size as f32 / 2.0;
    let hardness = key.hardness();
    let hard_radius = radius * hardness;
    let [r, g, b] = key.color;

    let mut pixels = RgbaImage::new(side, side);
    for (x, y, px) in pixels.enumerate_pixels_mut() {
        let dx = x as f32 - center;
        let dy = y as f32 - center;
        let dist_sq = dx * dx + dy * dy;
        let alpha = if dist_sq > radius * radius {
            0.0
        } else if hardness >= 0.99 || dist_sq <= hard_radius * hard_radius {
            1.0
        } else {
            let falloff = (dist_sq.sqrt() - hard_radius) / (radius - hard_radius);
            (falloff * std::f32::consts::FRAC_PI_2).cos()
        };
        *px = Rgba([r, g, b, (alpha.clamp(0.0, 1.0) * 255.0).round() as u8]);
    }
    BrushStamp { side, radius, pixels }
}

/// Bounded stamp cache with oldest-first eviction.
pub struct StampCache {
    stamps: HashMap<StampKey, Arc<BrushStamp>>,
    order: VecDeque<StampKey>,
    capacity: usize,
}

impl Default for StampCache {
    fn default() -> Self {
        Self::new(50)
    }
}

impl StampCache {
    pub fn new(capacity: usize) -> Self {
        Self { stamps: HashMap::new(), order: VecDeque::new(), capacity: capacity.max(1) }
    }

    pub fn get(&mut self, size: f32, hardness: f32, color: Color32) -> Arc<BrushStamp> {
        let key = StampKey::new(size, hardness, color);
        if let Some(stamp) = self.stamps.get(&key) {
            return Arc::clone(stamp);
        }
        let stamp = Arc::new(build_stamp(key));
        self.stamps.insert(key, Arc::clone(&stamp));
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.stamps.remove(&oldest);
            }
        }
        stamp
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }
}

// ============================================================================
// STROKE RASTERIZATION
// ============================================================================

/// Parameters shared by every dab of one stroke.
#[derive(Clone, Copy, Debug)]
pub struct BrushParams {
    /// Diameter in logical pixels.
    pub size: f32,
    pub hardness: f32,
    pub color: Color32,
    pub blend_mode: BlendMode,
}

/// Stamp centres between `last` and `next`.  Spacing adapts to the brush
/// size and the count is capped per segment, so fast moves stretch the
/// spacing instead of adding dabs.
pub fn stroke_positions(last: Pos2, next: Pos2, size: f32) -> Vec<Pos2> {
    let distance = last.distance(next);
    let spacing = (size * 0.15).max(2.0);
    let steps = ((distance / spacing).ceil() as u32).max(1);
    let actual = steps.min(MAX_STEPS_PER_SEGMENT);
    (0..=actual)
        .map(|i| {
            let t = ((i as f32 / actual as f32) * (steps as f32 / actual as f32)).min(1.0);
            last + (next - last) * t
        })
        .collect()
}

/// Composite one stamp centred on `center` (logical).  The stamp is
/// magnified by `scale` with nearest sampling into the device buffer.
pub fn composite_stamp(
    target: &mut TiledImage,
    stamp: &BrushStamp,
    center: Pos2,
    scale: f32,
    opacity: f32,
    mode: BlendMode,
) {
    if stamp.side == 0 {
        return;
    }
    let half = stamp.side as f32 / 2.0;
    let ox = ((center.x - half) * scale).floor() as i32;
    let oy = ((center.y - half) * scale).floor() as i32;
    let dest_side = ((stamp.side as f32 * scale).round() as i32).max(1);
    let max_src = stamp.side - 1;

    for j in 0..dest_side {
        let gy = oy + j;
        if gy < 0 || gy as u32 >= target.height() {
            continue;
        }
        let sy = ((j as f32 / scale) as u32).min(max_src);
        for i in 0..dest_side {
            let gx = ox + i;
            if gx < 0 || gx as u32 >= target.width() {
                continue;
            }
            let sx = ((i as f32 / scale) as u32).min(max_src);
            let px = *stamp.pixels.get_pixel(sx, sy);
            if px[3] == 0 {
                continue;
            }
            target.blend_pixel_at(gx as u32, gy as u32, px, mode, opacity);
        }
    }
}

/// Soft-brush segment: dabs from the cache along `last → next`, each at
/// full alpha.
pub fn stamp_segment(
    target: &mut TiledImage,
    cache: &mut StampCache,
    last: Pos2,
    next: Pos2,
    params: &BrushParams,
    scale: f32,
) {
    let stamp = cache.get(params.size, params.hardness, params.color);
    for p in stroke_positions(last, next, params.size) {
        composite_stamp(target, &stamp, p, scale, 1.0, params.blend_mode);
    }
}

/// Hard-edged, round-capped line of logical `width` from `a` to `b`.
pub fn stroke_hard_line(
    target: &mut TiledImage,
    a: Pos2,
    b: Pos2,
    width: f32,
    color: Rgba<u8>,
    mode: BlendMode,
    opacity: f32,
    scale: f32,
) {
    let r = width * scale / 2.0;
    if r <= 0.0 {
        return;
    }
    let (ax, ay) = (a.x * scale, a.y * scale);
    let (bx, by) = (b.x * scale, b.y * scale);
    let min_x = (ax.min(bx) - r - 1.0).floor().max(0.0) as u32;
    let min_y = (ay.min(by) - r - 1.0).floor().max(0.0) as u32;
    let max_x = ((ax.max(bx) + r + 1.0).ceil().max(0.0) as u32).min(target.width());
    let max_y = ((ay.max(by) + r + 1.0).ceil().max(0.0) as u32).min(target.height());

    for y in min_y..max_y {
        for x in min_x..max_x {
            let d = sdf_line_segment(x as f32 + 0.5, y as f32 + 0.5, ax, ay, bx, by);
            let coverage = smoothstep(0.5, -0.5, d - r);
            if coverage <= 0.0 {
                continue;
            }
            let top = Rgba([color[0], color[1], color[2], (color[3] as f32 * coverage).round() as u8]);
            target.blend_pixel_at(x, y, top, mode, opacity);
        }
    }
}
