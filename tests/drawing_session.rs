use drawly::canvas::{CanvasSize, ResizeHandle};
use drawly::components::tools::{PointerEvent, ShortcutAction, Tool};
use drawly::io;
use drawly::{EngineSettings, Project};
use egui::{Color32, Key, Modifiers, Pos2};
use image::{Rgba, RgbaImage};

fn settings() -> EngineSettings {
    EngineSettings { device_pixel_scale: 1.0, ..EngineSettings::default() }
}

fn project(w: u32, h: u32) -> Project {
    Project::with_size(CanvasSize::new(w, h), &settings())
}

fn drag(p: &mut Project, points: &[(f32, f32)]) {
    let (x, y) = points[0];
    p.pointer_down(PointerEvent::primary(Pos2::new(x, y))).unwrap();
    for &(x, y) in &points[1..] {
        p.pointer_move(PointerEvent::primary(Pos2::new(x, y)));
        p.frame().unwrap();
    }
    let (x, y) = points[points.len() - 1];
    p.pointer_up(PointerEvent::primary(Pos2::new(x, y))).unwrap();
}

fn active_pixels(p: &Project) -> RgbaImage {
    p.canvas.active_layer().unwrap().pixels.to_rgba_image()
}

#[test]
fn undo_redo_is_pixel_identical() {
    let mut p = project(120, 80);
    p.tools.set_tool(Tool::Brush);
    p.tools.config.size = 10.0;
    p.tools.config.color = Color32::from_rgb(200, 30, 30);
    drag(&mut p, &[(10.0, 10.0), (60.0, 40.0), (110.0, 20.0)]);
    let first = active_pixels(&p);

    p.tools.set_tool(Tool::Pencil);
    drag(&mut p, &[(5.0, 70.0), (115.0, 70.0)]);
    let second = active_pixels(&p);
    assert_ne!(first, second);

    assert!(p.undo());
    assert_eq!(active_pixels(&p), first);
    assert!(p.redo());
    assert_eq!(active_pixels(&p), second);

    assert!(p.undo());
    drag(&mut p, &[(60.0, 5.0), (60.0, 75.0)]);
    assert!(!p.can_redo());
    assert_eq!(p.undo_history(), vec!["Pencil Stroke".to_string(), "Brush Stroke".to_string()]);
}

#[test]
fn hard_line_of_width_four_makes_a_four_pixel_band() {
    let mut p = project(140, 100);
    p.tools.set_tool(Tool::Pencil);
    p.tools.config.size = 4.0;
    drag(&mut p, &[(20.0, 50.0), (120.0, 50.0)]);
    let img = active_pixels(&p);
    for x in [40, 70, 100] {
        let covered = (0..100).filter(|&y| img.get_pixel(x, y)[3] > 127).count();
        assert!((3..=5).contains(&covered), "column {} has {} covered pixels", x, covered);
    }
    assert_eq!(img.get_pixel(70, 40)[3], 0);
}

#[test]
fn opaque_top_layer_hides_everything_below() {
    let mut p = project(32, 24);
    let base = p.active_layer_id().clone();
    p.canvas.layer_mut(&base).unwrap().pixels.fill(Rgba([10, 200, 10, 255]));
    let top = p.create_layer(Some("cover"));
    p.canvas.layer_mut(&top).unwrap().pixels.fill(Rgba([40, 50, 60, 255]));

    let flat = p.flatten();
    assert!(flat.pixels().all(|px| *px == Rgba([40, 50, 60, 255])));

    p.set_layer_visible(&top, false).unwrap();
    assert!(p.flatten().pixels().all(|px| *px == Rgba([10, 200, 10, 255])));
}

#[test]
fn export_then_import_keeps_visible_content() {
    let mut p = project(64, 64);
    let id = p.active_layer_id().clone();
    p.canvas.layer_mut(&id).unwrap().pixels.fill(Rgba([20, 40, 220, 255]));
    let hidden = p.create_layer(None);
    p.canvas.layer_mut(&hidden).unwrap().pixels.fill(Rgba([255, 255, 0, 255]));
    p.set_layer_visible(&hidden, false).unwrap();

    let b64 = p.export_base64().unwrap();
    let decoded = io::decode_base64_image(&b64).unwrap();
    assert_eq!(decoded.dimensions(), (64, 64));
    let px = decoded.get_pixel(32, 32);
    assert!(px[2] > 180 && px[0] < 60 && px[1] < 80, "unexpected pixel {:?}", px);

    let mut other = project(64, 64);
    let jpeg = p.export_jpeg().unwrap();
    let layer = other.import_image_bytes(&jpeg, Some("import")).unwrap();
    let placement = other.canvas.layer(&layer).unwrap().image_position.unwrap();
    assert_eq!((placement.width, placement.height), (64.0, 64.0));
    let flat = other.flatten();
    assert!(flat.get_pixel(10, 10)[2] > 180);
}

#[test]
fn high_density_export_is_logical_size() {
    let settings = EngineSettings { device_pixel_scale: 2.0, ..EngineSettings::default() };
    let p = Project::with_size(CanvasSize::new(50, 30), &settings);
    assert_eq!(p.canvas.active_layer().unwrap().pixels.width(), 100);
    assert_eq!(p.flatten().dimensions(), (50, 30));
}

#[test]
fn zoom_in_twice_then_out_twice_restores_view() {
    let mut p = project(100, 100);
    p.origin = Pos2::new(30.0, 15.0);
    p.view.x = 12.0;
    p.view.y = -7.0;
    let before = p.view;
    let pointer = Pos2::new(140.0, 90.0);
    let anchor = p.to_canvas(pointer);

    p.wheel(-1.0, pointer);
    p.wheel(-1.0, pointer);
    assert!((p.view.scale - 1.21).abs() < 1e-4);
    let still = p.to_canvas(pointer);
    assert!((still.x - anchor.x).abs() < 1e-3 && (still.y - anchor.y).abs() < 1e-3);

    p.wheel(1.0, pointer);
    p.wheel(1.0, pointer);
    assert!((p.view.scale - before.scale).abs() < 1e-4);
    assert!((p.view.x - before.x).abs() < 1e-3);
    assert!((p.view.y - before.y).abs() < 1e-3);
}

#[test]
fn zoom_is_clamped() {
    let mut p = project(100, 100);
    for _ in 0..100 {
        p.wheel(-1.0, Pos2::new(50.0, 50.0));
    }
    assert_eq!(p.view.scale, 6.0);
    for _ in 0..200 {
        p.wheel(1.0, Pos2::new(50.0, 50.0));
    }
    assert!((p.view.scale - 0.2).abs() < 1e-6);
}

#[test]
fn space_held_turns_drags_into_pans() {
    let mut p = project(100, 100);
    p.tools.set_tool(Tool::Brush);
    assert_eq!(p.key_down(Key::Space, Modifiers::NONE), Some(ShortcutAction::PanHold));
    drag(&mut p, &[(10.0, 10.0), (30.0, 50.0)]);
    assert_eq!((p.view.x, p.view.y), (20.0, 40.0));
    assert!(!p.can_undo());
    p.key_up(Key::Space);

    drag(&mut p, &[(10.0, 10.0), (30.0, 50.0)]);
    assert!(p.can_undo());
}

#[test]
fn strokes_follow_the_view_transform() {
    let mut p = project(100, 100);
    p.tools.set_tool(Tool::Pencil);
    p.tools.config.size = 2.0;
    p.view.scale = 2.0;
    p.view.x = 10.0;
    drag(&mut p, &[(30.0, 40.0), (110.0, 40.0)]);
    let img = active_pixels(&p);
    // screen (30..110, 40) maps to canvas (10..50, 20)
    assert_eq!(img.get_pixel(30, 20)[3], 255);
    assert_eq!(img.get_pixel(70, 20)[3], 0);
}

#[test]
fn tool_shortcuts_only_without_modifiers() {
    let mut p = project(10, 10);
    p.key_down(Key::L, Modifiers::NONE);
    assert_eq!(p.tools.active_tool, Tool::Line);
    assert_eq!(p.key_down(Key::C, Modifiers::SHIFT), None);
    assert_eq!(p.tools.active_tool, Tool::Line);
    // F does nothing for lines
    assert_eq!(p.key_down(Key::F, Modifiers::NONE), None);
    p.key_down(Key::U, Modifiers::NONE);
    assert_eq!(p.key_down(Key::F, Modifiers::NONE), Some(ShortcutAction::CycleFillMode));
}

#[test]
fn clone_copies_from_the_fixed_offset() {
    let mut p = project(120, 60);
    let id = p.active_layer_id().clone();
    {
        let layer = p.canvas.layer_mut(&id).unwrap();
        for y in 0..60 {
            for x in 0..40 {
                layer.pixels.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
    }
    p.tools.set_tool(Tool::Clone);
    p.tools.config.size = 12.0;
    p.tools.config.hardness = 1.0;

    let alt = Modifiers { alt: true, ..Modifiers::NONE };
    p.pointer_down(PointerEvent::primary(Pos2::new(20.0, 30.0)).with_modifiers(alt)).unwrap();
    drag(&mut p, &[(80.0, 30.0), (81.0, 30.0)]);

    let img = active_pixels(&p);
    assert_eq!(img.get_pixel(81, 30).0, [255, 0, 0, 255]);
    assert_eq!(img.get_pixel(110, 30)[3], 0);
    assert_eq!(p.tools.clone.offset.map(|o| (o.x, o.y)), Some((60.0, 0.0)));
}

fn hidpi_project(w: u32, h: u32) -> Project {
    let settings = EngineSettings { device_pixel_scale: 2.0, ..EngineSettings::default() };
    Project::with_size(CanvasSize::new(w, h), &settings)
}

/// Opaque red over device columns `0..red_cols`, transparent elsewhere.
fn paint_red_band(p: &mut Project, red_cols: u32) {
    let id = p.active_layer_id().clone();
    let layer = p.canvas.layer_mut(&id).unwrap();
    let height = layer.pixels.height();
    for y in 0..height {
        for x in 0..red_cols {
            layer.pixels.put_pixel(x, y, Rgba([255, 0, 0, 255]));
        }
    }
}

#[test]
fn smudge_drags_colour_on_a_high_density_canvas() {
    let mut p = hidpi_project(80, 40);
    paint_red_band(&mut p, 80);
    let before = active_pixels(&p);
    p.tools.set_tool(Tool::Smudge);
    p.tools.config.size = 10.0;

    // logical 36 -> 44 is device 72 -> 88, a 10 device px window
    drag(&mut p, &[(36.0, 20.0), (44.0, 20.0)]);
    let after = active_pixels(&p);
    let carried = after.get_pixel(88, 40);
    assert_eq!(carried[3], 255);
    assert!(carried[0] > 100 && carried[1] == 0, "unexpected pixel {:?}", carried);
    assert_eq!(after.get_pixel(100, 40)[3], 0);
    assert!(before.pixels().zip(after.pixels()).all(|(b, a)| a[3] >= b[3]));
    assert!(!p.tools.smudge.is_active());
    assert_eq!(p.undo_history(), vec!["Smudge Stroke".to_string()]);
}

#[test]
fn cancelled_clone_stroke_is_kept_on_a_high_density_canvas() {
    let mut p = hidpi_project(120, 60);
    paint_red_band(&mut p, 80);
    p.tools.set_tool(Tool::Clone);
    p.tools.config.size = 12.0;
    p.tools.config.hardness = 1.0;

    let alt = Modifiers { alt: true, ..Modifiers::NONE };
    p.pointer_down(PointerEvent::primary(Pos2::new(20.0, 30.0)).with_modifiers(alt)).unwrap();
    p.pointer_down(PointerEvent::primary(Pos2::new(80.0, 30.0))).unwrap();
    p.pointer_move(PointerEvent::primary(Pos2::new(81.0, 30.0)));
    p.frame().unwrap();
    p.pointer_move(PointerEvent::primary(Pos2::new(100.0, 30.0)));
    p.pointer_cancel().unwrap();

    let img = active_pixels(&p);
    assert_eq!(img.get_pixel(162, 60).0, [255, 0, 0, 255]);
    assert_eq!(img.get_pixel(200, 60)[3], 0);
    assert!(p.tools.gesture.is_none() && p.tools.pending_move.is_none());
    assert_eq!(p.undo_history(), vec!["Clone Stroke".to_string()]);
}

#[test]
fn placed_image_moves_and_rejects_tiny_resizes() {
    let mut p = project(200, 100);
    let img = RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 255]));
    let id = p.import_image(img, Some("photo"));
    let placement = p.canvas.layer(&id).unwrap().image_position.unwrap();
    assert_eq!((placement.x, placement.y, placement.width, placement.height), (50.0, 0.0, 100.0, 100.0));

    assert!(!p.resize_image(&id, ResizeHandle::BottomRight, Pos2::new(65.0, 200.0)).unwrap());
    assert_eq!(p.canvas.layer(&id).unwrap().image_position, Some(placement));

    // drag the image with the select tool
    p.tools.set_tool(Tool::Select);
    drag(&mut p, &[(100.0, 50.0), (120.0, 50.0)]);
    let moved = p.canvas.layer(&id).unwrap().image_position.unwrap();
    assert_eq!(moved.x, 70.0);
    assert_eq!(p.canvas.active_layer().unwrap().pixels.get_pixel(60, 50)[3], 0);
    assert_eq!(p.canvas.active_layer().unwrap().pixels.get_pixel(165, 50)[3], 255);

    // grab the bottom-right handle and grow it
    drag(&mut p, &[(170.0, 100.0), (190.0, 100.0)]);
    assert_eq!(p.canvas.layer(&id).unwrap().image_position.unwrap().width, 120.0);
    assert!(p.undo());
    assert_eq!(p.canvas.layer(&id).unwrap().image_position.unwrap().width, 100.0);
}

#[test]
fn last_layer_cannot_be_deleted() {
    let mut p = project(10, 10);
    let only = p.active_layer_id().clone();
    assert!(p.delete_layer(&only).is_err());
    let extra = p.create_layer(None);
    assert_eq!(p.canvas.layer(&extra).unwrap().name, "Layer 2");
    p.delete_layer(&only).unwrap();
    assert_eq!(p.active_layer_id(), &extra);
}
