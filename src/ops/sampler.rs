// ============================================================================
// SMUDGE / CLONE SAMPLER – local pixel windows carried along a stroke
// ============================================================================
//
// All positions here are buffer-native (device pixels); the session scales
// logical pointer positions before calling in.

use egui::{Pos2, Vec2};
use image::{Rgba, RgbaImage};

use crate::canvas::{BlendMode, TiledImage};
use crate::ops::brush::BrushStamp;

/// Half-size of the sampling window in device pixels for a logical brush size.
pub fn sampler_radius(size: f32, scale: f32) -> u32 {
    (((size / 2.0).ceil() * scale).round() as u32).max(1)
}

fn window_origin(center: Pos2, radius: u32) -> (i32, i32) {
    (center.x.round() as i32 - radius as i32, center.y.round() as i32 - radius as i32)
}

// ---- smudge ----------------------------------------------------------------

#[derive(Default)]
pub struct SmudgeState {
    sample: Option<RgbaImage>,
}

impl SmudgeState {
    /// Pick up the window around the gesture's start point.
    pub fn begin(&mut self, buffer: &TiledImage, center: Pos2, radius: u32) {
        let (x, y) = window_origin(center, radius);
        self.sample = Some(buffer.extract_region(x, y, radius * 2, radius * 2));
    }

    pub fn is_active(&self) -> bool {
        self.sample.is_some()
    }

    pub fn clear(&mut self) {
        self.sample = None;
    }

    /// Drag the carried sample into the window at `center`, then pick the
    /// blended result back up.  Returns `false` when no gesture is active.
    pub fn apply(&mut self, buffer: &mut TiledImage, center: Pos2, radius: u32) -> bool {
        let Some(sample) = self.sample.as_ref() else { return false };
        let (x, y) = window_origin(center, radius);
        let side = radius * 2;
        let mut window = buffer.extract_region(x, y, side, side);
        let r = radius as f32;

        for (lx, ly, px) in window.enumerate_pixels_mut() {
            if lx >= sample.width() || ly >= sample.height() {
                continue;
            }
            let dx = lx as f32 - r;
            let dy = ly as f32 - r;
            let d = (dx * dx + dy * dy).sqrt() / r;
            if d > 1.0 {
                continue;
            }
            let blend = (1.0 - d) * 0.5;
            let s = sample.get_pixel(lx, ly);
            let mix = |cur: u8, src: u8| (cur as f32 * (1.0 - blend) + src as f32 * blend).round() as u8;
            *px = Rgba([mix(px[0], s[0]), mix(px[1], s[1]), mix(px[2], s[2]), px[3].max(s[3])]);
        }

        buffer.blit_rgba_at(x, y, &window);
        self.sample = Some(buffer.extract_region(x, y, side, side));
        true
    }
}

// ---- clone -----------------------------------------------------------------

/// Source anchor and fixed offset of the clone tool, in logical pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CloneState {
    pub source: Option<Pos2>,
    pub offset: Option<Vec2>,
}

impl CloneState {
    /// Modifier-click: set a new source and forget the previous offset.
    pub fn set_source(&mut self, p: Pos2) {
        self.source = Some(p);
        self.offset = None;
    }

    /// Normal press.  The first press after choosing a source fixes the
    /// offset.  Returns `false` when there is no source to clone from.
    pub fn press(&mut self, p: Pos2) -> bool {
        let Some(source) = self.source else { return false };
        if self.offset.is_none() {
            self.offset = Some(p - source);
        }
        true
    }
}

/// Copy the window at `center - offset` to `center`, masked by `stamp`.
pub fn clone_dab(
    buffer: &mut TiledImage,
    center: Pos2,
    offset: Vec2,
    radius: u32,
    stamp: &BrushStamp,
) {
    let side = radius * 2;
    let (sx, sy) = window_origin(center - offset, radius);
    let (dx, dy) = window_origin(center, radius);
    let source = buffer.extract_region(sx, sy, side, side);
    if stamp.side == 0 {
        return;
    }

    for (lx, ly, px) in source.enumerate_pixels() {
        if px[3] == 0 {
            continue;
        }
        let mx = ((lx as u64 * stamp.side as u64) / side as u64) as u32;
        let my = ((ly as u64 * stamp.side as u64) / side as u64) as u32;
        let mask = stamp.alpha_at(mx.min(stamp.side - 1), my.min(stamp.side - 1));
        if mask == 0 {
            continue;
        }
        let a = ((px[3] as u32 * mask as u32 + 127) / 255) as u8;
        let gx = dx + lx as i32;
        let gy = dy + ly as i32;
        if gx < 0 || gy < 0 {
            continue;
        }
        let src = Rgba([px[0], px[1], px[2], a]);
        buffer.blend_pixel_at(gx as u32, gy as u32, src, BlendMode::SourceOver, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::brush::{StampKey, build_stamp};
    use egui::Color32;

    #[test]
    fn clone_offset_is_fixed_on_first_press() {
        let mut state = CloneState::default();
        assert!(!state.press(Pos2::new(5.0, 5.0)));

        state.set_source(Pos2::new(10.0, 10.0));
        assert!(state.press(Pos2::new(40.0, 30.0)));
        assert_eq!(state.offset, Some(Vec2::new(30.0, 20.0)));
        assert!(state.press(Pos2::new(90.0, 90.0)));
        assert_eq!(state.offset, Some(Vec2::new(30.0, 20.0)));

        state.set_source(Pos2::new(0.0, 0.0));
        assert_eq!(state.offset, None);
    }

    #[test]
    fn clone_copies_source_pixels() {
        let mut img = TiledImage::new(100, 100);
        for y in 0..20 {
            for x in 0..20 {
                img.put_pixel(x, y, Rgba([0, 200, 0, 255]));
            }
        }
        let stamp = build_stamp(StampKey::new(10.0, 1.0, Color32::BLACK));
        clone_dab(&mut img, Pos2::new(60.0, 60.0), Vec2::new(50.0, 50.0), 5, &stamp);
        assert_eq!(*img.get_pixel(60, 60), Rgba([0, 200, 0, 255]));
        assert_eq!(img.get_pixel(30, 30)[3], 0);
    }

    #[test]
    fn smudge_carries_colour_without_reducing_alpha() {
        let mut img = TiledImage::new(40, 40);
        for y in 0..40 {
            for x in 0..20 {
                img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
            for x in 20..40 {
                img.put_pixel(x, y, Rgba([0, 0, 255, 128]));
            }
        }
        let mut smudge = SmudgeState::default();
        smudge.begin(&img, Pos2::new(10.0, 20.0), 4);
        assert!(smudge.apply(&mut img, Pos2::new(30.0, 20.0), 4));

        let center = img.get_pixel(30, 20);
        assert_eq!(center[3], 255);
        assert_eq!(center[0], 128);
        let edge = img.get_pixel(28, 18);
        assert!(edge[0] > 0 && edge[0] < 128);
        assert_eq!(*img.get_pixel(35, 20), Rgba([0, 0, 255, 128]));
    }

    #[test]
    fn smudge_without_begin_does_nothing() {
        let mut img = TiledImage::new(10, 10);
        let mut smudge = SmudgeState::default();
        assert!(!smudge.apply(&mut img, Pos2::new(5.0, 5.0), 2));
        smudge.begin(&img, Pos2::new(5.0, 5.0), 2);
        smudge.clear();
        assert!(!smudge.is_active());
    }
}
