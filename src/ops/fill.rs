// ============================================================================
// FLOOD FILL – exact-match, 4-connected, budgeted
// ============================================================================

use image::Rgba;

use crate::canvas::TiledImage;

pub const DEFAULT_MAX_FILL_PIXELS: usize = 2_000_000;

/// Result of one fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillOutcome {
    pub filled: usize,
    /// The pixel budget ran out; the region is only partially filled.
    pub capped: bool,
    /// Inclusive bounding box of the filled pixels.
    pub bounds: Option<(u32, u32, u32, u32)>,
}

/// Fill the region connected to (x, y) whose pixels equal the seed exactly.
/// Coordinates are buffer-native.  Out-of-bounds seeds and seeds already
/// holding `color` are no-ops.
pub fn flood_fill(
    buffer: &mut TiledImage,
    x: u32,
    y: u32,
    color: Rgba<u8>,
    max_pixels: usize,
) -> FillOutcome {
    let (w, h) = (buffer.width(), buffer.height());
    if x >= w || y >= h {
        return FillOutcome::default();
    }
    let seed = *buffer.get_pixel(x, y);
    if seed == color {
        return FillOutcome::default();
    }

    let flat = buffer.to_rgba_image();
    let raw = flat.as_raw();
    let wu = w as usize;

    #[inline(always)]
    fn pix(raw: &[u8], idx: usize) -> [u8; 4] {
        let o = idx * 4;
        [raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]
    }

    // visited bitmap, set on push
    let mut visited = vec![false; wu * h as usize];
    let mut stack: Vec<u32> = Vec::with_capacity(4096);
    let seed_idx = y as usize * wu + x as usize;
    visited[seed_idx] = true;
    stack.push(seed_idx as u32);

    let mut filled = 0usize;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);

    while filled < max_pixels {
        let Some(idx) = stack.pop() else { break };
        let idx = idx as usize;
        let px = (idx % wu) as u32;
        let py = (idx / wu) as u32;
        buffer.put_pixel(px, py, color);
        filled += 1;
        min_x = min_x.min(px);
        max_x = max_x.max(px);
        min_y = min_y.min(py);
        max_y = max_y.max(py);

        let mut visit = |ni: usize| {
            if !visited[ni] && pix(raw, ni) == seed.0 {
                visited[ni] = true;
                stack.push(ni as u32);
            }
        };
        if px > 0 {
            visit(idx - 1);
        }
        if px + 1 < w {
            visit(idx + 1);
        }
        if py > 0 {
            visit(idx - wu);
        }
        if py + 1 < h {
            visit(idx + wu);
        }
    }

    let capped = !stack.is_empty();
    if capped {
        log::warn!("flood fill stopped at the {} pixel budget; region left partially filled", max_pixels);
    }
    FillOutcome { filled, capped, bounds: (filled > 0).then_some((min_x, min_y, max_x, max_y)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    /// 30×30 buffer with a vertical wall at x = 10.
    fn walled() -> TiledImage {
        let mut img = TiledImage::new(30, 30);
        for y in 0..30 {
            img.put_pixel(10, y, BLUE);
        }
        img
    }

    #[test]
    fn fills_exactly_the_connected_region() {
        let mut img = walled();
        let before = img.clone();
        let out = flood_fill(&mut img, 0, 0, RED, DEFAULT_MAX_FILL_PIXELS);
        assert_eq!(out.filled, 10 * 30);
        assert!(!out.capped);
        assert_eq!(out.bounds, Some((0, 0, 9, 29)));
        for y in 0..30 {
            for x in 0..30 {
                let changed = img.get_pixel(x, y) != before.get_pixel(x, y);
                if changed {
                    assert_eq!(before.get_pixel(x, y), before.get_pixel(0, 0));
                }
                assert_eq!(changed, x < 10, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn near_miss_colours_are_not_filled() {
        let mut img = TiledImage::new(5, 1);
        img.put_pixel(2, 0, Rgba([0, 0, 0, 1]));
        let out = flood_fill(&mut img, 0, 0, RED, DEFAULT_MAX_FILL_PIXELS);
        assert_eq!(out.filled, 2);
        assert_eq!(*img.get_pixel(2, 0), Rgba([0, 0, 0, 1]));
        assert_eq!(img.get_pixel(3, 0)[3], 0);
    }

    #[test]
    fn same_colour_is_a_no_op() {
        let mut img = walled();
        let out = flood_fill(&mut img, 10, 5, BLUE, DEFAULT_MAX_FILL_PIXELS);
        assert_eq!(out, FillOutcome::default());
    }

    #[test]
    fn out_of_bounds_seed_is_ignored() {
        let mut img = walled();
        assert_eq!(flood_fill(&mut img, 30, 0, RED, DEFAULT_MAX_FILL_PIXELS).filled, 0);
    }

    #[test]
    fn budget_caps_the_fill() {
        let mut img = TiledImage::new(20, 20);
        let out = flood_fill(&mut img, 5, 5, RED, 100);
        assert_eq!(out.filled, 100);
        assert!(out.capped);
        let painted = (0..20).flat_map(|y| (0..20).map(move |x| (x, y))).filter(|&(x, y)| img.get_pixel(x, y)[3] > 0).count();
        assert_eq!(painted, 100);
    }

    #[test]
    fn exact_budget_is_not_reported_as_capped() {
        let mut img = walled();
        let out = flood_fill(&mut img, 0, 0, RED, 300);
        assert_eq!(out.filled, 300);
        assert!(!out.capped);
    }
}
