// ============================================================================
// SHAPES – line / rectangle / circle / triangle rasterization and gradients
// ============================================================================

use egui::{Color32, Pos2, Vec2};
use image::Rgba;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::{BlendMode, TiledImage};

/// Dash and gap length of the preview outline, in logical pixels.
const PREVIEW_DASH: f32 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    Line,
    Rectangle,
    Circle,
    Triangle,
}

/// How a closed shape is painted on commit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeFillMode {
    #[default]
    Stroke,
    Fill,
    Both,
}

impl ShapeFillMode {
    /// stroke → fill → both → stroke
    pub fn next(self) -> Self {
        match self {
            ShapeFillMode::Stroke => ShapeFillMode::Fill,
            ShapeFillMode::Fill => ShapeFillMode::Both,
            ShapeFillMode::Both => ShapeFillMode::Stroke,
        }
    }

    pub fn fills(self) -> bool {
        matches!(self, ShapeFillMode::Fill | ShapeFillMode::Both)
    }

    pub fn strokes(self) -> bool {
        matches!(self, ShapeFillMode::Stroke | ShapeFillMode::Both)
    }
}

/// Concrete geometry derived from a drag in logical coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeGeometry {
    Line { a: Pos2, b: Pos2 },
    /// Origin plus signed extent; negative sizes are valid.
    Rectangle { origin: Pos2, size: Vec2 },
    Circle { center: Pos2, radius: f32 },
    Triangle([Pos2; 3]),
}

impl ShapeGeometry {
    /// Geometry for a drag from `anchor` to `cursor`.
    pub fn from_drag(kind: ShapeKind, anchor: Pos2, cursor: Pos2) -> Self {
        let d = cursor - anchor;
        match kind {
            ShapeKind::Line => ShapeGeometry::Line { a: anchor, b: cursor },
            ShapeKind::Rectangle => ShapeGeometry::Rectangle { origin: anchor, size: d },
            ShapeKind::Circle => ShapeGeometry::Circle { center: anchor, radius: d.length() },
            ShapeKind::Triangle => ShapeGeometry::Triangle([
                anchor,
                Pos2::new(anchor.x + d.x, anchor.y + d.y),
                Pos2::new(anchor.x - d.x, anchor.y + d.y),
            ]),
        }
    }

    fn is_closed(&self) -> bool {
        !matches!(self, ShapeGeometry::Line { .. })
    }

    /// Outline vertices scaled to device pixels.
    fn outline(&self, scale: f32) -> Vec<(f32, f32)> {
        let s = |p: Pos2| (p.x * scale, p.y * scale);
        match self {
            ShapeGeometry::Line { a, b } => vec![s(*a), s(*b)],
            ShapeGeometry::Rectangle { origin, size } => vec![
                s(*origin),
                s(Pos2::new(origin.x + size.x, origin.y)),
                s(*origin + *size),
                s(Pos2::new(origin.x, origin.y + size.y)),
            ],
            ShapeGeometry::Circle { center, radius } => {
                let r = radius * scale;
                let n = ((std::f32::consts::TAU * r / 2.0).ceil() as usize).clamp(16, 720);
                (0..n)
                    .map(|i| {
                        let a = i as f32 / n as f32 * std::f32::consts::TAU;
                        (center.x * scale + r * a.cos(), center.y * scale + r * a.sin())
                    })
                    .collect()
            }
            ShapeGeometry::Triangle(pts) => pts.iter().map(|p| s(*p)).collect(),
        }
    }
}

/// Paint parameters for one rasterization pass.
#[derive(Clone, Copy, Debug)]
pub struct ShapeStyle {
    /// Stroke width in logical pixels.
    pub width: f32,
    pub color: Color32,
    pub fill_mode: ShapeFillMode,
    /// Dashed `[5, 5]` outline, used for previews.
    pub dashed: bool,
}

/// Rasterize `geom` into `target` with source-over compositing.
pub fn rasterize_shape(
    target: &mut TiledImage,
    geom: &ShapeGeometry,
    style: &ShapeStyle,
    scale: f32,
) {
    let verts = geom.outline(scale);
    let closed = geom.is_closed();
    let half_w = style.width * scale / 2.0;
    let do_fill = closed && style.fill_mode.fills();
    let do_stroke = !closed || style.fill_mode.strokes();
    let dash = if style.dashed { Some(PREVIEW_DASH * scale) } else { None };

    let pad = half_w + 2.0;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for &(x, y) in &verts {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let x0 = (min_x - pad).floor().max(0.0) as u32;
    let y0 = (min_y - pad).floor().max(0.0) as u32;
    let x1 = ((max_x + pad).ceil().max(0.0) as u32).min(target.width());
    let y1 = ((max_y + pad).ceil().max(0.0) as u32).min(target.height());
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let bw = (x1 - x0) as usize;

    let segments = polyline_segments(&verts, closed);
    let circle = match geom {
        ShapeGeometry::Circle { center, radius } => {
            Some((center.x * scale, center.y * scale, radius * scale))
        }
        _ => None,
    };

    // (fill coverage, stroke coverage) per pixel of the bounding box
    let mut coverage = vec![(0.0f32, 0.0f32); bw * (y1 - y0) as usize];
    coverage.par_chunks_mut(bw).enumerate().for_each(|(row, out)| {
        let py = (y0 as usize + row) as f32 + 0.5;
        for (col, cell) in out.iter_mut().enumerate() {
            let px = (x0 as usize + col) as f32 + 0.5;
            if do_fill {
                let d = match circle {
                    Some((cx, cy, r)) => ((px - cx).powi(2) + (py - cy).powi(2)).sqrt() - r,
                    None => sdf_convex_polygon(&verts, px, py),
                };
                cell.0 = smoothstep(0.5, -0.5, d);
            }
            if do_stroke {
                let (d, s) = nearest_on_polyline(&segments, px, py);
                let on_dash = match dash {
                    Some(len) => s.rem_euclid(len * 2.0) < len,
                    None => true,
                };
                if on_dash {
                    cell.1 = smoothstep(0.5, -0.5, d - half_w);
                }
            }
        }
    });

    let [r, g, b, a] = style.color.to_array();
    for (i, &(fill_cov, stroke_cov)) in coverage.iter().enumerate() {
        let x = x0 + (i % bw) as u32;
        let y = y0 + (i / bw) as u32;
        for cov in [fill_cov, stroke_cov] {
            if cov > 0.0 {
                let top = Rgba([r, g, b, (a as f32 * cov).round() as u8]);
                target.blend_pixel_at(x, y, top, BlendMode::SourceOver, 1.0);
            }
        }
    }
}

/// Segment list with the arc length at each segment start.
fn polyline_segments(verts: &[(f32, f32)], closed: bool) -> Vec<((f32, f32), (f32, f32), f32)> {
    let mut out = Vec::new();
    let mut travelled = 0.0;
    let n = verts.len();
    let count = if closed { n } else { n.saturating_sub(1) };
    for i in 0..count {
        let a = verts[i];
        let b = verts[(i + 1) % n];
        out.push((a, b, travelled));
        travelled += ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
    }
    if out.is_empty()
        && let Some(&p) = verts.first()
    {
        out.push((p, p, 0.0));
    }
    out
}

/// Distance to the closest segment and the arc length at that point.
fn nearest_on_polyline(segments: &[((f32, f32), (f32, f32), f32)], px: f32, py: f32) -> (f32, f32) {
    let mut best = (f32::MAX, 0.0);
    for &((ax, ay), (bx, by), start) in segments {
        let dx = bx - ax;
        let dy = by - ay;
        let len_sq = dx * dx + dy * dy;
        let t = if len_sq > 0.0 { (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0) } else { 0.0 };
        let cx = ax + t * dx;
        let cy = ay + t * dy;
        let d = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
        if d < best.0 {
            best = (d, start + t * len_sq.sqrt());
        }
    }
    best
}

// ============================================================================
// SDF helpers
// ============================================================================

/// Signed distance to a convex polygon (negative inside).
pub(crate) fn sdf_convex_polygon(verts: &[(f32, f32)], px: f32, py: f32) -> f32 {
    let n = verts.len();
    if n == 0 {
        return f32::MAX;
    }
    let mut d = (px - verts[0].0).powi(2) + (py - verts[0].1).powi(2);
    let mut s: f32 = 1.0;
    let mut j = n - 1;
    for i in 0..n {
        let ex = verts[j].0 - verts[i].0;
        let ey = verts[j].1 - verts[i].1;
        let wx = px - verts[i].0;
        let wy = py - verts[i].1;
        let len_sq = ex * ex + ey * ey;
        if len_sq > 0.0 {
            let t = ((wx * ex + wy * ey) / len_sq).clamp(0.0, 1.0);
            d = d.min((wx - ex * t).powi(2) + (wy - ey * t).powi(2));
        }
        // crossing test
        let c1 = py >= verts[i].1;
        let c2 = py < verts[j].1;
        let c3 = ex * wy > ey * wx;
        if (c1 && c2 && c3) || (!c1 && !c2 && !c3) {
            s = -s;
        }
        j = i;
    }
    s * d.sqrt()
}

/// Unsigned distance from (px, py) to the segment a–b.
pub(crate) fn sdf_line_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 { (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0) } else { 0.0 };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

#[inline]
pub(crate) fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

// ============================================================================
// GRADIENT
// ============================================================================

/// Linear gradient from `color` at `start` to transparent at `end` over the
/// whole buffer.  Before `start` the colour is solid, past `end` nothing is
/// painted.  A zero-length gradient paints nothing.
pub fn draw_linear_gradient(
    target: &mut TiledImage,
    start: Pos2,
    end: Pos2,
    color: Color32,
    scale: f32,
) {
    let s = start.to_vec2() * scale;
    let axis = (end - start) * scale;
    let len_sq = axis.length_sq();
    if len_sq <= f32::EPSILON {
        return;
    }
    let [r, g, b, _] = color.to_array();
    let mut flat = target.to_rgba_image();
    let w = flat.width() as usize;
    let raw: &mut [u8] = &mut flat;
    raw.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
        let py = y as f32 + 0.5;
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let p = Vec2::new(x as f32 + 0.5, py) - s;
            let t = (p.dot(axis) / len_sq).clamp(0.0, 1.0);
            let alpha = ((1.0 - t) * 255.0).round() as u8;
            let base = Rgba([px[0], px[1], px[2], px[3]]);
            let out = crate::canvas::blend_pixel(base, Rgba([r, g, b, alpha]), BlendMode::SourceOver, 1.0);
            px.copy_from_slice(&out.0);
        }
    });
    *target = TiledImage::from_rgba_image(&flat);
}
