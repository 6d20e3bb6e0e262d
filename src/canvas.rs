use std::sync::Arc;

use egui::{Pos2, Vec2};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// TILED IMAGE – sparse 64×64 chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// Upper bound on a single buffer (about 256 megapixels).
const MAX_PIXELS: u64 = 256_000_000;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Sparse tiled pixel buffer backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
///
/// Chunks are wrapped in `Arc` for copy-on-write: `clone()` only bumps
/// reference counts, and writes go through `Arc::make_mut` so only the
/// touched chunk is duplicated.  History snapshots rely on this.
#[derive(Clone, Debug)]
pub struct TiledImage {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl TiledImage {
    // ---- construction -------------------------------------------------------

    /// Create an empty (fully transparent) buffer.
    pub fn new(width: u32, height: u32) -> Self {
        let too_large = (width as u64) * (height as u64) > MAX_PIXELS;
        let (width, height) = if width == 0 || height == 0 || too_large {
            log::warn!("TiledImage::new: invalid dimensions {}×{}, clamped to 1×1", width, height);
            (1, 1)
        } else {
            (width, height)
        };
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; (chunks_per_row * chunks_per_col) as usize],
        }
    }

    /// Import from a flat `RgbaImage`.  Only non-transparent chunks are stored.
    /// Chunk conversion runs in parallel.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let mut img = Self::new(src.width(), src.height());
        if img.width != src.width() || img.height != src.height() {
            return img;
        }
        let width = img.width;
        let height = img.height;
        let cpr = img.chunks_per_row as usize;
        let raw = src.as_raw();

        let built: Vec<Option<Arc<RgbaImage>>> = (0..img.chunks.len())
            .into_par_iter()
            .map(|flat| {
                let base_x = (flat % cpr) as u32 * CHUNK_SIZE;
                let base_y = (flat / cpr) as u32 * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(width - base_x) as usize;
                let ch = CHUNK_SIZE.min(height - base_y);
                let stride = CHUNK_SIZE as usize * 4;
                let mut data = vec![0u8; stride * CHUNK_SIZE as usize];
                let mut has_content = false;
                for ly in 0..ch {
                    let src_start = ((base_y + ly) * width + base_x) as usize * 4;
                    let row = &raw[src_start..src_start + cw * 4];
                    has_content |= row.chunks_exact(4).any(|px| px[3] != 0);
                    let dst_start = ly as usize * stride;
                    data[dst_start..dst_start + cw * 4].copy_from_slice(row);
                }
                if !has_content {
                    return None;
                }
                RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, data).map(Arc::new)
            })
            .collect();

        img.chunks = built;
        img
    }

    /// Flatten back to a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let out_stride = self.width as usize * 4;
        let chunk_stride = CHUNK_SIZE as usize * 4;
        let out_raw: &mut [u8] = &mut out;
        for (idx, slot) in self.chunks.iter().enumerate() {
            let Some(chunk) = slot else { continue };
            let base_x = (idx as u32 % self.chunks_per_row) * CHUNK_SIZE;
            let base_y = (idx as u32 / self.chunks_per_row) * CHUNK_SIZE;
            let cw = CHUNK_SIZE.min(self.width - base_x) as usize;
            let ch = CHUNK_SIZE.min(self.height - base_y) as usize;
            let chunk_raw = chunk.as_raw();
            for ly in 0..ch {
                let src = ly * chunk_stride;
                let dst = (base_y as usize + ly) * out_stride + base_x as usize * 4;
                out_raw[dst..dst + cw * 4].copy_from_slice(&chunk_raw[src..src + cw * 4]);
            }
        }
        out
    }

    /// Copy a window into a new image.  The window may extend past the
    /// buffer edges; those samples come back transparent.
    pub fn extract_region(&self, x: i32, y: i32, w: u32, h: u32) -> RgbaImage {
        let mut out = RgbaImage::new(w, h);
        for ly in 0..h {
            let gy = y + ly as i32;
            if gy < 0 || gy as u32 >= self.height {
                continue;
            }
            for lx in 0..w {
                let gx = x + lx as i32;
                if gx < 0 || gx as u32 >= self.width {
                    continue;
                }
                out.put_pixel(lx, ly, *self.get_pixel(gx as u32, gy as u32));
            }
        }
        out
    }

    /// Copy of this buffer at a new size: content anchored at the origin,
    /// cropped when shrinking, transparent where the buffer grows.
    pub fn letterboxed(&self, width: u32, height: u32) -> TiledImage {
        let mut out = TiledImage::new(width, height);
        let w = self.width.min(out.width);
        let h = self.height.min(out.height);
        let region = self.extract_region(0, 0, w, h);
        out.blit_rgba_at(0, 0, &region);
        out
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn slot_index(&self, x: u32, y: u32) -> usize {
        ((y / CHUNK_SIZE) * self.chunks_per_row + x / CHUNK_SIZE) as usize
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (returns `&TRANSPARENT_PIXEL` for missing chunks or out of bounds).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        match &self.chunks[self.slot_index(x, y)] {
            Some(chunk) => chunk.get_pixel(x % CHUNK_SIZE, y % CHUNK_SIZE),
            None => &TRANSPARENT_PIXEL,
        }
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.slot_index(x, y);
        if pixel[3] == 0 && self.chunks[idx].is_none() {
            return;
        }
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(x % CHUNK_SIZE, y % CHUNK_SIZE, pixel);
    }

    /// Composite `top` onto the pixel at (x, y).
    #[inline]
    pub fn blend_pixel_at(&mut self, x: u32, y: u32, top: Rgba<u8>, mode: BlendMode, opacity: f32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let base = *self.get_pixel(x, y);
        let out = blend_pixel(base, top, mode, opacity);
        if out != base {
            self.put_pixel(x, y, out);
        }
    }

    /// Overwrite a rectangle with `src`, clipped to the buffer.  Runs that are
    /// fully transparent and land on a missing chunk stay unallocated.
    pub fn blit_rgba_at(&mut self, dst_x: i32, dst_y: i32, src: &RgbaImage) {
        let src_w = src.width();
        let data = src.as_raw();
        for sy in 0..src.height() {
            let gy = dst_y + sy as i32;
            if gy < 0 || gy as u32 >= self.height {
                continue;
            }
            let gy = gy as u32;
            let row_start = sy as usize * src_w as usize * 4;

            let mut sx = 0u32;
            while sx < src_w {
                let gx = dst_x + sx as i32;
                if gx < 0 {
                    sx += 1;
                    continue;
                }
                let gx = gx as u32;
                if gx >= self.width {
                    break;
                }
                let lx = gx % CHUNK_SIZE;
                let run = (CHUNK_SIZE - lx).min(src_w - sx).min(self.width - gx);
                let src_off = row_start + sx as usize * 4;
                let bytes = &data[src_off..src_off + run as usize * 4];
                let idx = self.slot_index(gx, gy);

                let has_content = bytes.chunks_exact(4).any(|px| px[3] != 0);
                if has_content || self.chunks[idx].is_some() {
                    let arc = self.chunks[idx]
                        .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
                    let chunk = Arc::make_mut(arc);
                    let ly = gy % CHUNK_SIZE;
                    let dst_off = (ly * CHUNK_SIZE + lx) as usize * 4;
                    let raw: &mut [u8] = chunk;
                    raw[dst_off..dst_off + bytes.len()].copy_from_slice(bytes);
                }
                sx += run;
            }
        }
    }

    // ---- bulk operations ----------------------------------------------------

    /// Fill every pixel with `color`.
    pub fn fill(&mut self, color: Rgba<u8>) {
        if color[3] == 0 && color == TRANSPARENT_PIXEL {
            self.clear();
            return;
        }
        let chunk = Arc::new(RgbaImage::from_pixel(CHUNK_SIZE, CHUNK_SIZE, color));
        for slot in &mut self.chunks {
            *slot = Some(Arc::clone(&chunk));
        }
    }

    /// Drop all chunks (make the buffer fully transparent).
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Approximate memory usage in bytes.  Chunks shared with another buffer
    /// (typically a history snapshot) are counted at pointer cost only.
    pub fn memory_bytes(&self) -> usize {
        let chunk_bytes = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
        self.chunks
            .iter()
            .flatten()
            .map(|arc| {
                if Arc::strong_count(arc) == 1 { chunk_bytes } else { std::mem::size_of::<usize>() * 2 }
            })
            .sum()
    }

    /// Bytes held by chunks that `previous` does not share slot-for-slot.
    pub fn unshared_bytes(&self, previous: Option<&TiledImage>) -> usize {
        let chunk_bytes = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
        self.chunks
            .iter()
            .enumerate()
            .filter(|(i, slot)| match (slot, previous.and_then(|p| p.chunks.get(*i))) {
                (Some(a), Some(Some(b))) => !Arc::ptr_eq(a, b),
                (Some(_), _) => true,
                (None, _) => false,
            })
            .count()
            * chunk_bytes
    }

    /// True when both buffers hold identical pixels.  A missing chunk equals
    /// a fully transparent one.
    pub fn same_pixels(&self, other: &TiledImage) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        self.chunks.iter().zip(&other.chunks).all(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.as_raw() == b.as_raw(),
            (Some(c), None) | (None, Some(c)) => c.as_raw().chunks_exact(4).all(|px| px == [0, 0, 0, 0]),
            (None, None) => true,
        })
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

/// Compositing operations available to tools and layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    SourceOver,
    DestinationOut,
    Multiply,
    Screen,
    Overlay,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::SourceOver,
            BlendMode::DestinationOut,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::SourceOver => "source-over",
            BlendMode::DestinationOut => "destination-out",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
        }
    }
}

/// Composite `top` onto `base` with the given mode and extra opacity
/// (straight alpha, sRGB bytes).
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    if mode == BlendMode::SourceOver && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let top_a = (top[3] as f32 / 255.0) * opacity;
    let base_a = base[3] as f32 / 255.0;

    if mode == BlendMode::DestinationOut {
        let out_a = base_a * (1.0 - top_a);
        let a = (out_a * 255.0).round() as u8;
        if a == 0 {
            return Rgba([0, 0, 0, 0]);
        }
        return Rgba([base[0], base[1], base[2], a]);
    }

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let b = base[c] as f32 / 255.0;
        let t = top[c] as f32 / 255.0;
        let mixed = match mode {
            BlendMode::Multiply => b * t,
            BlendMode::Screen => 1.0 - (1.0 - b) * (1.0 - t),
            BlendMode::Overlay => overlay_channel(b, t),
            _ => t,
        };
        // Separable blend: the mixed colour only applies where the backdrop exists.
        let src = mixed * base_a + t * (1.0 - base_a);
        let v = (src * top_a + b * base_a * (1.0 - top_a)) / out_a;
        out[c] = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    Rgba(out)
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

// ============================================================================
// LAYERS
// ============================================================================

/// Stable layer identifier.  Kept as a string so documents written by other
/// front-ends (`layer-0`, `layer-1700000000`) round-trip untouched.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    pub fn generate() -> Self {
        Self(format!("layer-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical canvas dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Corner handles used to resize a placed image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeHandle {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl ResizeHandle {
    pub fn all() -> [ResizeHandle; 4] {
        [ResizeHandle::TopLeft, ResizeHandle::TopRight, ResizeHandle::BottomLeft, ResizeHandle::BottomRight]
    }
}

/// Logical rectangle an imported image occupies.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePlacement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ImagePlacement {
    /// Scale `(iw, ih)` to fit inside the canvas and center it.
    pub fn fit_centered(iw: u32, ih: u32, canvas: CanvasSize) -> Self {
        let (cw, ch) = (canvas.width as f32, canvas.height as f32);
        let scale = (cw / iw.max(1) as f32).min(ch / ih.max(1) as f32);
        let width = iw as f32 * scale;
        let height = ih as f32 * scale;
        Self { x: (cw - width) / 2.0, y: (ch - height) / 2.0, width, height }
    }

    pub fn corner(&self, handle: ResizeHandle) -> Pos2 {
        match handle {
            ResizeHandle::TopLeft => Pos2::new(self.x, self.y),
            ResizeHandle::TopRight => Pos2::new(self.x + self.width, self.y),
            ResizeHandle::BottomLeft => Pos2::new(self.x, self.y + self.height),
            ResizeHandle::BottomRight => Pos2::new(self.x + self.width, self.y + self.height),
        }
    }

    pub fn contains(&self, p: Pos2) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    /// New rectangle after dragging `handle` to `to`; the opposite corner stays put.
    pub fn resized(&self, handle: ResizeHandle, to: Pos2) -> Self {
        let right = self.x + self.width;
        let bottom = self.y + self.height;
        let (x0, x1) = match handle {
            ResizeHandle::TopLeft | ResizeHandle::BottomLeft => (to.x, right),
            ResizeHandle::TopRight | ResizeHandle::BottomRight => (self.x, to.x),
        };
        let (y0, y1) = match handle {
            ResizeHandle::TopLeft | ResizeHandle::TopRight => (to.y, bottom),
            ResizeHandle::BottomLeft | ResizeHandle::BottomRight => (self.y, to.y),
        };
        Self { x: x0, y: y0, width: x1 - x0, height: y1 - y0 }
    }
}

pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub z_index: i32,
    pub pixels: TiledImage,
    /// Logical placement of an imported image, adjustable with the select tool.
    pub image_position: Option<ImagePlacement>,
    /// Decoded source of an imported image, kept to re-render after move/resize.
    pub source_image: Option<Arc<RgbaImage>>,
}

impl Layer {
    pub fn new(id: LayerId, name: String, width: u32, height: u32, z_index: i32) -> Self {
        Self {
            id,
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::SourceOver,
            z_index,
            pixels: TiledImage::new(width, height),
            image_position: None,
            source_image: None,
        }
    }
}

// ============================================================================
// CANVAS STATE
// ============================================================================

/// All layers of a canvas plus the active-layer pointer.  Layer buffers are
/// sized `size × pixel_scale`; tools take logical coordinates and scale them.
pub struct CanvasState {
    pub size: CanvasSize,
    pub pixel_scale: f32,
    pub layers: Vec<Layer>,
    pub active_layer: LayerId,
    /// Counter behind the default `Layer N` names.
    pub(crate) layer_counter: u32,
}

impl CanvasState {
    pub fn new(size: CanvasSize, pixel_scale: f32) -> Self {
        let pixel_scale = if pixel_scale > 0.0 && pixel_scale.is_finite() { pixel_scale } else { 1.0 };
        let (bw, bh) = device_dims(size, pixel_scale);
        let first = Layer::new(LayerId::generate(), "Layer 1".to_string(), bw, bh, 0);
        Self {
            size,
            pixel_scale,
            active_layer: first.id.clone(),
            layers: vec![first],
            layer_counter: 1,
        }
    }

    /// Canvas with no layers; callers must add at least one before use.
    pub(crate) fn empty(size: CanvasSize, pixel_scale: f32) -> Self {
        let mut state = Self::new(size, pixel_scale);
        state.layers.clear();
        state.layer_counter = 0;
        state
    }

    /// Buffer dimensions in device pixels.
    pub fn buffer_size(&self) -> (u32, u32) {
        device_dims(self.size, self.pixel_scale)
    }

    pub fn to_device(&self, p: Pos2) -> Pos2 {
        Pos2::new(p.x * self.pixel_scale, p.y * self.pixel_scale)
    }

    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| &l.id == id)
    }

    pub fn layer_mut(&mut self, id: &LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| &l.id == id)
    }

    pub fn layer_index(&self, id: &LayerId) -> Result<usize> {
        self.layers
            .iter()
            .position(|l| &l.id == id)
            .ok_or_else(|| EngineError::LayerNotFound(id.clone()))
    }

    pub fn active_layer(&self) -> Result<&Layer> {
        self.layer(&self.active_layer)
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!("active layer {} has no buffer", self.active_layer))
            })
    }

    pub fn active_layer_mut(&mut self) -> Result<&mut Layer> {
        let id = self.active_layer.clone();
        self.layer_mut(&id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("active layer {} has no buffer", id)))
    }

    /// Layer indices sorted bottom to top by z-index.
    pub fn z_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.layers.len()).collect();
        order.sort_by_key(|&i| self.layers[i].z_index);
        order
    }

    pub fn top_z(&self) -> i32 {
        self.layers.iter().map(|l| l.z_index).max().unwrap_or(-1)
    }

    /// Total buffer memory, counting chunks shared with snapshots at pointer cost.
    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.pixels.memory_bytes()).sum()
    }
}

pub(crate) fn device_dims(size: CanvasSize, scale: f32) -> (u32, u32) {
    (
        ((size.width as f32 * scale).round() as u32).max(1),
        ((size.height as f32 * scale).round() as u32).max(1),
    )
}

// ============================================================================
// VIEW TRANSFORM – pan / zoom between screen and logical canvas space
// ============================================================================

/// Zoom bounds and per-notch factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomLimits {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self { min: 0.2, max: 6.0, step: 1.1 }
    }
}

/// Screen-space translation and scale of the canvas inside its container.
/// Presentational only, never persisted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewState {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
}

impl Default for ViewState {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, scale: 1.0 }
    }
}

impl ViewState {
    /// Map a screen position to logical canvas coordinates.  `origin` is the
    /// container's top-left corner on screen.
    pub fn to_canvas(&self, screen: Pos2, origin: Pos2) -> Pos2 {
        Pos2::new(
            (screen.x - origin.x - self.x) / self.scale,
            (screen.y - origin.y - self.y) / self.scale,
        )
    }

    pub fn to_screen(&self, canvas: Pos2, origin: Pos2) -> Pos2 {
        Pos2::new(
            canvas.x * self.scale + self.x + origin.x,
            canvas.y * self.scale + self.y + origin.y,
        )
    }

    /// One wheel notch: positive `delta_y` zooms out, anything else zooms in.
    pub fn zoom_wheel(&mut self, delta_y: f32, pointer: Pos2, origin: Pos2, limits: &ZoomLimits) {
        let factor = if delta_y > 0.0 { 1.0 / limits.step } else { limits.step };
        self.zoom_by(factor, pointer, origin, limits);
    }

    /// Scale by `factor` keeping the canvas point under `pointer` fixed.
    pub fn zoom_by(&mut self, factor: f32, pointer: Pos2, origin: Pos2, limits: &ZoomLimits) {
        let old = self.scale;
        let new = (old * factor).clamp(limits.min, limits.max);
        if new == old {
            return;
        }
        let ratio = (new - old) / old;
        self.x -= (pointer.x - origin.x - self.x) * ratio;
        self.y -= (pointer.y - origin.y - self.y) * ratio;
        self.scale = new;
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.x += delta.x;
        self.y += delta.y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_on_write_keeps_clone_intact() {
        let mut a = TiledImage::new(130, 70);
        a.put_pixel(5, 5, Rgba([1, 2, 3, 255]));
        let snapshot = a.clone();
        a.put_pixel(5, 5, Rgba([9, 9, 9, 255]));
        assert_eq!(*snapshot.get_pixel(5, 5), Rgba([1, 2, 3, 255]));
        assert_eq!(*a.get_pixel(5, 5), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn rgba_image_conversion_keeps_pixels() {
        let mut src = RgbaImage::new(100, 80);
        src.put_pixel(99, 79, Rgba([10, 20, 30, 255]));
        src.put_pixel(64, 0, Rgba([1, 1, 1, 128]));
        let tiled = TiledImage::from_rgba_image(&src);
        assert_eq!(tiled.chunk_count(), 2);
        assert_eq!(tiled.to_rgba_image(), src);
    }

    #[test]
    fn letterbox_anchors_content_at_origin() {
        let mut img = TiledImage::new(20, 20);
        img.put_pixel(3, 4, Rgba([255, 0, 0, 255]));
        img.put_pixel(19, 19, Rgba([0, 255, 0, 255]));
        let grown = img.letterboxed(40, 30);
        assert_eq!(*grown.get_pixel(3, 4), Rgba([255, 0, 0, 255]));
        assert_eq!(*grown.get_pixel(19, 19), Rgba([0, 255, 0, 255]));
        assert_eq!(grown.get_pixel(30, 25)[3], 0);
        let shrunk = img.letterboxed(10, 10);
        assert_eq!(shrunk.width(), 10);
        assert_eq!(*shrunk.get_pixel(3, 4), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn blit_overwrites_existing_content() {
        let mut img = TiledImage::new(10, 10);
        img.fill(Rgba([255, 255, 255, 255]));
        img.blit_rgba_at(-1, -1, &RgbaImage::new(3, 3));
        assert_eq!(img.get_pixel(0, 0)[3], 0);
        assert_eq!(img.get_pixel(1, 1)[3], 0);
        assert_eq!(img.get_pixel(2, 2)[3], 255);
    }

    #[test]
    fn same_pixels_treats_missing_chunk_as_transparent() {
        let a = TiledImage::new(70, 70);
        let mut b = TiledImage::new(70, 70);
        b.put_pixel(1, 1, Rgba([5, 5, 5, 255]));
        b.put_pixel(1, 1, Rgba([0, 0, 0, 0]));
        assert!(a.same_pixels(&b));
        b.put_pixel(69, 69, Rgba([5, 5, 5, 1]));
        assert!(!a.same_pixels(&b));
    }

    #[test]
    fn destination_out_removes_alpha() {
        let base = Rgba([200, 100, 50, 255]);
        assert_eq!(blend_pixel(base, Rgba([0, 0, 0, 255]), BlendMode::DestinationOut, 1.0), Rgba([0, 0, 0, 0]));
        let half = blend_pixel(base, Rgba([0, 0, 0, 255]), BlendMode::DestinationOut, 0.5);
        assert_eq!(half, Rgba([200, 100, 50, 128]));
    }

    #[test]
    fn source_over_on_transparent_keeps_colour() {
        let out = blend_pixel(Rgba([0, 0, 0, 0]), Rgba([255, 0, 0, 128]), BlendMode::SourceOver, 1.0);
        assert_eq!(out, Rgba([255, 0, 0, 128]));
        let multiplied = blend_pixel(Rgba([255, 255, 255, 255]), Rgba([128, 64, 0, 255]), BlendMode::Multiply, 1.0);
        assert_eq!(multiplied, Rgba([128, 64, 0, 255]));
    }

    #[test]
    fn fit_centered_letterboxes_wide_image() {
        let p = ImagePlacement::fit_centered(400, 100, CanvasSize::new(200, 200));
        assert_eq!((p.width, p.height), (200.0, 50.0));
        assert_eq!((p.x, p.y), (0.0, 75.0));
    }

    #[test]
    fn zoom_in_then_out_restores_view() {
        let limits = ZoomLimits::default();
        let origin = Pos2::new(10.0, 20.0);
        let pointer = Pos2::new(310.0, 220.0);
        let mut view = ViewState { x: 15.0, y: -40.0, scale: 1.0 };
        let start = view;
        let anchored = view.to_canvas(pointer, origin);

        view.zoom_wheel(-1.0, pointer, origin, &limits);
        view.zoom_wheel(-1.0, pointer, origin, &limits);
        assert!((view.scale - 1.21).abs() < 1e-5);
        let still = view.to_canvas(pointer, origin);
        assert!((still.x - anchored.x).abs() < 1e-3 && (still.y - anchored.y).abs() < 1e-3);

        view.zoom_wheel(1.0, pointer, origin, &limits);
        view.zoom_wheel(1.0, pointer, origin, &limits);
        assert!((view.scale - start.scale).abs() < 1e-5);
        assert!((view.x - start.x).abs() < 1e-3);
        assert!((view.y - start.y).abs() < 1e-3);
    }

    #[test]
    fn zoom_is_clamped() {
        let limits = ZoomLimits::default();
        let mut view = ViewState::default();
        for _ in 0..100 {
            view.zoom_wheel(-1.0, Pos2::ZERO, Pos2::ZERO, &limits);
        }
        assert_eq!(view.scale, 6.0);
        for _ in 0..100 {
            view.zoom_wheel(1.0, Pos2::ZERO, Pos2::ZERO, &limits);
        }
        assert_eq!(view.scale, 0.2);
    }

    #[test]
    fn canvas_coords_undo_pan_and_scale() {
        let view = ViewState { x: 50.0, y: 30.0, scale: 2.0 };
        let origin = Pos2::new(100.0, 100.0);
        let p = view.to_canvas(Pos2::new(250.0, 230.0), origin);
        assert_eq!(p, Pos2::new(50.0, 50.0));
        assert_eq!(view.to_screen(p, origin), Pos2::new(250.0, 230.0));
    }
}
