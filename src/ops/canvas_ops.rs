// ============================================================================
// CANVAS-LEVEL OPERATIONS - add / delete / merge / reorder layers, resize,
// imported-image placement
// ============================================================================
//
// None of these touch history; the session commits a snapshot after each
// successful call.

use std::sync::Arc;

use egui::{Pos2, Vec2};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use rayon::prelude::*;

use crate::canvas::{
    blend_pixel, device_dims, CanvasSize, CanvasState, ImagePlacement, Layer, LayerId, ResizeHandle,
    TiledImage,
};
use crate::error::{EngineError, Result};

/// Images narrower or shorter than this (logical px) cannot be produced by a resize drag.
pub const MIN_IMAGE_EXTENT: f32 = 20.0;

/// Screen-space radius of an image resize handle.
pub const HANDLE_HIT_RADIUS: f32 = 12.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerDirection {
    Up,
    Down,
}

/// Add an empty layer on top of the z-order and make it active.
pub fn create_layer(state: &mut CanvasState, name: Option<&str>) -> LayerId {
    state.layer_counter += 1;
    let name = name.map(str::to_string).unwrap_or_else(|| format!("Layer {}", state.layer_counter));
    let (w, h) = state.buffer_size();
    let layer = Layer::new(LayerId::generate(), name, w, h, state.top_z() + 1);
    let id = layer.id.clone();
    log::info!("layer created: {} ({})", layer.name, id);
    state.layers.push(layer);
    state.active_layer = id.clone();
    id
}

/// Remove a layer.  The last remaining layer cannot be removed.
pub fn delete_layer(state: &mut CanvasState, id: &LayerId) -> Result<()> {
    let idx = state.layer_index(id)?;
    if state.layers.len() <= 1 {
        return Err(EngineError::InvariantViolation("cannot delete the last layer".into()));
    }
    let removed = state.layers.remove(idx);
    if state.active_layer == removed.id
        && let Some(top) = state.z_order().last().map(|&i| state.layers[i].id.clone())
    {
        state.active_layer = top;
    }
    log::info!("layer deleted: {} ({})", removed.name, removed.id);
    Ok(())
}

/// Composite `id` onto the layer directly below it in z-order using the
/// source's opacity and blend mode, then remove the source.  Returns
/// `Ok(false)` when the layer is already bottom-most.
pub fn merge_down(state: &mut CanvasState, id: &LayerId) -> Result<bool> {
    let src_idx = state.layer_index(id)?;
    let order = state.z_order();
    let Some(pos) = order.iter().position(|&i| i == src_idx) else {
        return Ok(false);
    };
    if pos == 0 {
        return Ok(false);
    }
    let dst_idx = order[pos - 1];

    let (opacity, mode) = (state.layers[src_idx].opacity, state.layers[src_idx].blend_mode);
    let top = state.layers[src_idx].pixels.to_rgba_image();
    let mut base = state.layers[dst_idx].pixels.to_rgba_image();
    let top_raw = top.as_raw();
    let row = base.width() as usize * 4;
    let base_raw: &mut [u8] = &mut base;
    base_raw.par_chunks_mut(row).zip(top_raw.par_chunks(row)).for_each(|(dst, src)| {
        for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
            if s[3] == 0 {
                continue;
            }
            let out = blend_pixel(
                image::Rgba([d[0], d[1], d[2], d[3]]),
                image::Rgba([s[0], s[1], s[2], s[3]]),
                mode,
                opacity,
            );
            d.copy_from_slice(&out.0);
        }
    });

    let target_id = state.layers[dst_idx].id.clone();
    {
        let target = &mut state.layers[dst_idx];
        target.pixels = TiledImage::from_rgba_image(&base);
        // merged pixels no longer track the placed image
        target.image_position = None;
        target.source_image = None;
    }
    let removed = state.layers.remove(src_idx);
    state.active_layer = target_id;
    log::info!("merged {} down into {}", removed.id, state.active_layer);
    Ok(true)
}

pub fn set_opacity(state: &mut CanvasState, id: &LayerId, opacity: f32) -> Result<()> {
    let layer = state.layer_mut(id).ok_or_else(|| EngineError::LayerNotFound(id.clone()))?;
    layer.opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { 1.0 };
    Ok(())
}

pub fn set_visible(state: &mut CanvasState, id: &LayerId, visible: bool) -> Result<()> {
    let layer = state.layer_mut(id).ok_or_else(|| EngineError::LayerNotFound(id.clone()))?;
    layer.visible = visible;
    Ok(())
}

pub fn rename_layer(state: &mut CanvasState, id: &LayerId, name: &str) -> Result<()> {
    let layer = state.layer_mut(id).ok_or_else(|| EngineError::LayerNotFound(id.clone()))?;
    layer.name = name.to_string();
    Ok(())
}

pub fn set_active_layer(state: &mut CanvasState, id: &LayerId) -> Result<()> {
    state.layer_index(id)?;
    state.active_layer = id.clone();
    Ok(())
}

/// Swap z-index with the neighbour in `dir`.  `Ok(false)` at the boundary.
pub fn move_layer(state: &mut CanvasState, id: &LayerId, dir: LayerDirection) -> Result<bool> {
    let idx = state.layer_index(id)?;
    let order = state.z_order();
    let Some(pos) = order.iter().position(|&i| i == idx) else {
        return Ok(false);
    };
    let neighbour = match dir {
        LayerDirection::Up => order.get(pos + 1).copied(),
        LayerDirection::Down => pos.checked_sub(1).map(|p| order[p]),
    };
    let Some(other) = neighbour else {
        return Ok(false);
    };
    let (a, b) = (state.layers[idx].z_index, state.layers[other].z_index);
    state.layers[idx].z_index = b;
    state.layers[other].z_index = a;
    Ok(true)
}

/// Resize every buffer to a new logical size.  Painted content keeps its
/// origin anchor (cropped or padded); image layers are re-rendered.
pub fn resize_canvas(state: &mut CanvasState, size: CanvasSize) {
    if size == state.size {
        return;
    }
    let (w, h) = device_dims(size, state.pixel_scale);
    let scale = state.pixel_scale;
    for layer in &mut state.layers {
        match (layer.image_position, layer.source_image.clone()) {
            (Some(placement), Some(source)) => {
                layer.pixels = TiledImage::new(w, h);
                render_placed_image(&mut layer.pixels, &source, &placement, scale);
            }
            _ => layer.pixels = layer.pixels.letterboxed(w, h),
        }
    }
    log::info!("canvas resized {}x{} -> {}x{}", state.size.width, state.size.height, size.width, size.height);
    state.size = size;
}

// ============================================================================
// IMPORTED IMAGES
// ============================================================================

/// Draw `source` scaled into `placement` (logical) on an otherwise cleared buffer.
pub fn render_placed_image(
    target: &mut TiledImage,
    source: &RgbaImage,
    placement: &ImagePlacement,
    scale: f32,
) {
    target.clear();
    let w = (placement.width * scale).round();
    let h = (placement.height * scale).round();
    if w < 1.0 || h < 1.0 {
        return;
    }
    let scaled = imageops::resize(source, w as u32, h as u32, FilterType::Triangle);
    target.blit_rgba_at((placement.x * scale).round() as i32, (placement.y * scale).round() as i32, &scaled);
}

/// New top layer holding `image`, scaled to fit and centred.
pub fn import_image(state: &mut CanvasState, image: RgbaImage, name: Option<&str>) -> LayerId {
    let placement = ImagePlacement::fit_centered(image.width(), image.height(), state.size);
    let id = create_layer(state, name);
    let scale = state.pixel_scale;
    if let Some(layer) = state.layer_mut(&id) {
        render_placed_image(&mut layer.pixels, &image, &placement, scale);
        layer.image_position = Some(placement);
        layer.source_image = Some(Arc::new(image));
    }
    id
}

fn placed_image(state: &CanvasState, id: &LayerId) -> Result<(ImagePlacement, Arc<RgbaImage>)> {
    let layer = state.layer(id).ok_or_else(|| EngineError::LayerNotFound(id.clone()))?;
    match (layer.image_position, layer.source_image.clone()) {
        (Some(p), Some(src)) => Ok((p, src)),
        _ => Err(EngineError::Validation(format!("layer {} has no placed image", id))),
    }
}

fn apply_placement(
    state: &mut CanvasState,
    id: &LayerId,
    placement: ImagePlacement,
    source: &RgbaImage,
) {
    let scale = state.pixel_scale;
    if let Some(layer) = state.layer_mut(id) {
        render_placed_image(&mut layer.pixels, source, &placement, scale);
        layer.image_position = Some(placement);
    }
}

/// Translate a placed image by a logical delta.
pub fn move_image(state: &mut CanvasState, id: &LayerId, delta: Vec2) -> Result<()> {
    let (mut placement, source) = placed_image(state, id)?;
    placement.x += delta.x;
    placement.y += delta.y;
    apply_placement(state, id, placement, &source);
    Ok(())
}

/// Drag a corner handle to `to`.  Returns `Ok(false)` (and changes nothing)
/// when the result would not be larger than the minimum extent.
pub fn resize_image(
    state: &mut CanvasState,
    id: &LayerId,
    handle: ResizeHandle,
    to: Pos2,
) -> Result<bool> {
    let (placement, source) = placed_image(state, id)?;
    let next = placement.resized(handle, to);
    if next.width <= MIN_IMAGE_EXTENT || next.height <= MIN_IMAGE_EXTENT {
        return Ok(false);
    }
    apply_placement(state, id, next, &source);
    Ok(true)
}

/// Corner handle of `id`'s image under the logical point `p`.
pub fn hit_test_handle(
    state: &CanvasState,
    id: &LayerId,
    p: Pos2,
    view_scale: f32,
) -> Option<ResizeHandle> {
    let placement = state.layer(id)?.image_position?;
    let radius = HANDLE_HIT_RADIUS / view_scale.max(f32::EPSILON);
    ResizeHandle::all().into_iter().find(|&h| placement.corner(h).distance(p) <= radius)
}

/// Top-most visible layer whose placed image contains `p`.
pub fn hit_test_image(state: &CanvasState, p: Pos2) -> Option<LayerId> {
    state
        .z_order()
        .into_iter()
        .rev()
        .map(|i| &state.layers[i])
        .find(|l| l.visible && l.image_position.is_some_and(|pl| pl.contains(p)))
        .map(|l| l.id.clone())
}
