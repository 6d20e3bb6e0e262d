use std::collections::HashSet;
use std::path::Path;

use egui::{Color32, Key, Modifiers, PointerButton, Pos2, Vec2};
use image::{Rgba, RgbaImage};
use uuid::Uuid;

use crate::canvas::{
    CanvasSize, CanvasState, Layer, LayerId, ResizeHandle, TiledImage, ViewState, ZoomLimits,
};
use crate::commands::{
    CommandKind, DEFAULT_FILL_TOLERANCE, DrawingCommand, LayerInfo, LayerOperation, Point, Stroke,
    StrokePoint, now_millis, strokes_from_commands,
};
use crate::components::history::{CommandLog, HistoryManager, HistoryMark};
use crate::components::tools::{
    Gesture, PendingMove, PointerEvent, ShortcutAction, Tool, ToolConfig, ToolsState, shortcut_action,
};
use crate::document::{DOCUMENT_VERSION, DocumentMetadata, DrawingDocument};
use crate::error::{EngineError, Result};
use crate::feedback::{
    self, FeedbackClient, FeedbackError, FeedbackReport, FeedbackRequest, QuestionnaireAnswers,
};
use crate::io;
use crate::ops::brush::{stamp_segment, stroke_hard_line};
use crate::ops::canvas_ops::{self, LayerDirection};
use crate::ops::fill::flood_fill;
use crate::ops::sampler::{clone_dab, sampler_radius};
use crate::ops::shapes::{ShapeGeometry, ShapeStyle, draw_linear_gradient, rasterize_shape};
use crate::ops::smoothing::{SmoothingMode, simplify_stroke};
use crate::settings::EngineSettings;

/// How recorded strokes are treated when a document is replayed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReplayOptions {
    pub smoothing: SmoothingMode,
    /// Douglas-Peucker tolerance in logical pixels.
    pub simplify: Option<f32>,
}

/// Single open drawing: layers, view, tools, history and the command log.
/// Every mutation happens synchronously inside these methods.
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub canvas: CanvasState,
    pub view: ViewState,
    /// Top-left of the canvas container on screen.
    pub origin: Pos2,
    pub tools: ToolsState,
    pub metadata: Option<DocumentMetadata>,
    pub is_dirty: bool,
    history: HistoryManager<CanvasState>,
    log: CommandLog,
    /// Every committed stroke; only the first `active_strokes` are live.
    strokes: Vec<Stroke>,
    active_strokes: usize,
    settings: EngineSettings,
    zoom: ZoomLimits,
    created_at: u64,
}

impl Project {
    /// Untitled drawing at the configured canvas size.
    pub fn new(settings: &EngineSettings) -> Self {
        Self::with_size(CanvasSize::new(settings.canvas_width, settings.canvas_height), settings)
    }

    pub fn with_size(size: CanvasSize, settings: &EngineSettings) -> Self {
        Self::from_canvas(CanvasState::new(size, settings.device_pixel_scale), settings)
    }

    fn from_canvas(canvas: CanvasState, settings: &EngineSettings) -> Self {
        let history =
            HistoryManager::new(&canvas, settings.max_undo_steps, settings.history_memory_bytes());
        Self {
            id: Uuid::new_v4(),
            name: "Untitled".to_string(),
            canvas,
            view: ViewState::default(),
            origin: Pos2::ZERO,
            tools: ToolsState::new(settings.stamp_cache_size),
            metadata: None,
            is_dirty: false,
            history,
            log: CommandLog::new(settings.command_log_size),
            strokes: Vec::new(),
            active_strokes: 0,
            settings: settings.clone(),
            zoom: ZoomLimits {
                min: settings.zoom_min,
                max: settings.zoom_max,
                step: settings.zoom_step,
            },
            created_at: now_millis(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty { format!("{}*", self.name) } else { self.name.clone() }
    }

    // ---- history ------------------------------------------------------------

    fn record(&mut self, kind: CommandKind) {
        self.log.add(DrawingCommand::new(kind));
    }

    /// Log the commands of one stroke and keep the stroke itself, which
    /// outlives the bounded log.
    fn record_stroke(&mut self, kinds: Vec<CommandKind>) {
        let commands: Vec<DrawingCommand> = kinds.into_iter().map(DrawingCommand::new).collect();
        self.strokes.truncate(self.active_strokes);
        self.strokes.extend(strokes_from_commands(&commands));
        self.active_strokes = self.strokes.len();
        for command in commands {
            self.log.add(command);
        }
    }

    fn mark(&self) -> HistoryMark {
        HistoryMark { command_seq: self.log.active_seq(), strokes: self.active_strokes }
    }

    fn restore_mark(&mut self, mark: HistoryMark) {
        self.log.set_active_seq(mark.command_seq);
        self.active_strokes = mark.strokes.min(self.strokes.len());
    }

    /// Strokes that are part of the current state, oldest first.
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes[..self.active_strokes]
    }

    fn commit(&mut self, label: &str) {
        self.strokes.truncate(self.active_strokes);
        self.history.save(&self.canvas, label, self.mark());
        self.is_dirty = true;
        log::debug!("commit: {} (history {}/{})", label, self.history.index() + 1, self.history.len());
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Restore the previous snapshot.  Ignored while a gesture is in progress.
    pub fn undo(&mut self) -> bool {
        if self.tools.gesture.is_some() {
            return false;
        }
        match self.history.undo(&mut self.canvas) {
            Some(mark) => {
                self.restore_mark(mark);
                self.after_restore();
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.tools.gesture.is_some() {
            return false;
        }
        match self.history.redo(&mut self.canvas) {
            Some(mark) => {
                self.restore_mark(mark);
                self.after_restore();
                true
            }
            None => false,
        }
    }

    fn after_restore(&mut self) {
        if let Some(sel) = &self.tools.selected_image
            && self.canvas.layer(sel).is_none_or(|l| l.image_position.is_none())
        {
            self.tools.selected_image = None;
        }
        self.is_dirty = true;
    }

    pub fn undo_history(&self) -> Vec<String> {
        self.history.undo_history()
    }

    pub fn history_memory(&self) -> usize {
        self.history.memory_usage()
    }

    pub fn command_log(&self) -> &CommandLog {
        &self.log
    }

    // ---- view ---------------------------------------------------------------

    pub fn to_canvas(&self, screen: Pos2) -> Pos2 {
        self.view.to_canvas(screen, self.origin)
    }

    pub fn to_screen(&self, canvas: Pos2) -> Pos2 {
        self.view.to_screen(canvas, self.origin)
    }

    /// One wheel notch at a screen position.
    pub fn wheel(&mut self, delta_y: f32, pointer: Pos2) {
        self.view.zoom_wheel(delta_y, pointer, self.origin, &self.zoom);
    }

    pub fn zoom_by(&mut self, factor: f32, pointer: Pos2) {
        self.view.zoom_by(factor, pointer, self.origin, &self.zoom);
    }

    // ---- keyboard -----------------------------------------------------------

    /// Apply the shortcut bound to `key`, returning what it did.
    pub fn key_down(&mut self, key: Key, modifiers: Modifiers) -> Option<ShortcutAction> {
        let action = shortcut_action(key, modifiers, self.tools.active_tool)?;
        match action {
            ShortcutAction::SelectTool(tool) => self.tools.set_tool(tool),
            ShortcutAction::Undo => {
                self.undo();
            }
            ShortcutAction::Redo => {
                self.redo();
            }
            ShortcutAction::CycleFillMode => self.tools.cycle_fill_mode(),
            ShortcutAction::PanHold => self.tools.space_held = true,
        }
        Some(action)
    }

    pub fn key_up(&mut self, key: Key) {
        if key == Key::Space {
            self.tools.space_held = false;
        }
    }

    // ---- pointer ------------------------------------------------------------

    pub fn pointer_down(&mut self, ev: PointerEvent) -> Result<()> {
        if ev.button == PointerButton::Middle || self.tools.gesture.is_some() {
            return Ok(());
        }
        if self.tools.wants_pan(ev.button) {
            self.tools.gesture = Some(Gesture::Pan { last_screen: ev.pos });
            return Ok(());
        }
        if ev.button != PointerButton::Primary {
            return Ok(());
        }
        let p = self.to_canvas(ev.pos);
        self.press_at(p, ev.pressure, ev.modifiers.alt)
    }

    /// Pans apply immediately; drawing moves wait for the next [`frame`](Self::frame).
    pub fn pointer_move(&mut self, ev: PointerEvent) {
        match &mut self.tools.gesture {
            Some(Gesture::Pan { last_screen }) => {
                let delta = ev.pos - *last_screen;
                *last_screen = ev.pos;
                self.view.pan_by(delta);
            }
            Some(_) => {
                let pos = self.view.to_canvas(ev.pos, self.origin);
                self.tools.pending_move = Some(PendingMove { pos, pressure: ev.pressure });
            }
            None => {}
        }
    }

    /// Apply the latest pending move, if any.  Returns whether anything was applied.
    pub fn frame(&mut self) -> Result<bool> {
        let Some(pending) = self.tools.pending_move.take() else { return Ok(false) };
        self.apply_move(pending.pos, pending.pressure)?;
        Ok(true)
    }

    /// End the gesture.  Any move not yet applied by [`frame`](Self::frame) is dropped.
    pub fn pointer_up(&mut self, _ev: PointerEvent) -> Result<()> {
        self.release()
    }

    pub fn pointer_cancel(&mut self) -> Result<()> {
        self.release()
    }

    /// Start a gesture at a logical canvas position with the active tool.
    fn press_at(&mut self, p: Pos2, pressure: f32, alt: bool) -> Result<()> {
        let tool = self.tools.active_tool;
        match tool {
            Tool::Pan | Tool::Text | Tool::Lasso => Ok(()),
            Tool::Select => self.select_press(p),
            Tool::Fill => self.fill_at(p),
            Tool::Clone if alt => {
                self.tools.clone.set_source(p);
                Ok(())
            }
            Tool::Clone => {
                if !self.tools.clone.press(p) {
                    return Ok(());
                }
                self.begin_paint(p, pressure)
            }
            Tool::Smudge => {
                self.begin_paint(p, pressure)?;
                let radius = sampler_radius(self.tools.config.size, self.canvas.pixel_scale);
                let center = self.canvas.to_device(p);
                let layer = self.canvas.active_layer()?;
                self.tools.smudge.begin(&layer.pixels, center, radius);
                Ok(())
            }
            Tool::Gradient | Tool::Line | Tool::Rectangle | Tool::Circle | Tool::Triangle => {
                let layer = self.canvas.active_layer()?;
                let gesture = Gesture::Preview {
                    layer: layer.id.clone(),
                    config: self.tools.current_config(),
                    anchor: p,
                    cursor: p,
                    before: layer.pixels.clone(),
                };
                self.tools.gesture = Some(gesture);
                Ok(())
            }
            Tool::Pencil | Tool::Brush | Tool::Eraser | Tool::Marker => self.begin_paint(p, pressure),
        }
    }

    fn begin_paint(&mut self, p: Pos2, pressure: f32) -> Result<()> {
        let layer = self.canvas.active_layer()?.id.clone();
        self.tools.gesture = Some(Gesture::Paint {
            layer,
            config: self.tools.current_config(),
            stroke_id: format!("stroke-{}", Uuid::new_v4().simple()),
            last: p,
            points: vec![StrokePoint::new(p, pressure)],
            painted: false,
        });
        Ok(())
    }

    fn select_press(&mut self, p: Pos2) -> Result<()> {
        if let Some(sel) = self.tools.selected_image.clone()
            && let Some(handle) = canvas_ops::hit_test_handle(&self.canvas, &sel, p, self.view.scale)
        {
            self.tools.gesture = Some(Gesture::ResizeImage { layer: sel, handle, resized: false });
            return Ok(());
        }
        match canvas_ops::hit_test_image(&self.canvas, p) {
            Some(id) => {
                self.canvas.active_layer = id.clone();
                self.tools.selected_image = Some(id.clone());
                self.tools.gesture = Some(Gesture::MoveImage { layer: id, last: p, moved: false });
            }
            None => self.tools.selected_image = None,
        }
        Ok(())
    }

    fn fill_at(&mut self, p: Pos2) -> Result<()> {
        let [r, g, b, _] = self.tools.config.color.to_array();
        let device = self.canvas.to_device(p);
        let max_pixels = self.settings.fill_max_pixels;
        let layer = self.canvas.active_layer_mut()?;
        if device.x < 0.0 || device.y < 0.0 {
            return Ok(());
        }
        let (x, y) = (device.x as u32, device.y as u32);
        let outcome = flood_fill(&mut layer.pixels, x, y, Rgba([r, g, b, 255]), max_pixels);
        if outcome.filled == 0 {
            return Ok(());
        }
        let layer_id = layer.id.clone();
        self.record(CommandKind::Fill {
            layer_id,
            point: Point { x: p.x, y: p.y },
            color: Color32::from_rgb(r, g, b),
            tolerance: DEFAULT_FILL_TOLERANCE,
        });
        self.commit("Fill");
        Ok(())
    }

    fn apply_move(&mut self, pos: Pos2, pressure: f32) -> Result<()> {
        let Some(mut gesture) = self.tools.gesture.take() else { return Ok(()) };
        match self.apply_gesture_move(&mut gesture, pos, pressure) {
            Ok(()) => {
                self.tools.gesture = Some(gesture);
                Ok(())
            }
            Err(e) => {
                log::error!("gesture aborted: {}", e);
                self.tools.end_gesture();
                Err(e)
            }
        }
    }

    fn apply_gesture_move(
        &mut self,
        gesture: &mut Gesture,
        pos: Pos2,
        pressure: f32,
    ) -> Result<()> {
        let scale = self.canvas.pixel_scale;
        match gesture {
            Gesture::Paint { layer, config, last, points, painted, .. } => {
                let target = &mut layer_buffer(&mut self.canvas, layer)?.pixels;
                let device = Pos2::new(pos.x * scale, pos.y * scale);
                match config.tool {
                    Tool::Smudge => {
                        self.tools.smudge.apply(target, device, sampler_radius(config.size, scale));
                    }
                    Tool::Clone => {
                        let offset = self.tools.clone.offset.unwrap_or_default() * scale;
                        let stamp =
                            self.tools.stamp_cache.get(config.size, config.hardness, Color32::BLACK);
                        let radius = sampler_radius(config.size, scale);
                        clone_dab(target, device, offset, radius, &stamp);
                    }
                    _ if config.draws_hard_line() => {
                        let [r, g, b, _] = config.color.to_array();
                        let opacity = config.opacity.clamp(0.0, 1.0);
                        let mode = config.effective_blend();
                        let color = Rgba([r, g, b, 255]);
                        stroke_hard_line(target, *last, pos, config.size, color, mode, opacity, scale);
                    }
                    _ => {
                        let params = config.brush_params();
                        stamp_segment(target, &mut self.tools.stamp_cache, *last, pos, &params, scale);
                    }
                }
                *last = pos;
                points.push(StrokePoint::new(pos, pressure));
                *painted = true;
            }
            Gesture::Preview { layer, config, anchor, cursor, before } => {
                *cursor = pos;
                let target = &mut layer_buffer(&mut self.canvas, layer)?.pixels;
                *target = before.clone();
                draw_preview_tool(target, config, *anchor, pos, scale, true);
            }
            Gesture::MoveImage { layer, last, moved } => {
                canvas_ops::move_image(&mut self.canvas, layer, pos - *last)?;
                *last = pos;
                *moved = true;
            }
            Gesture::ResizeImage { layer, handle, resized } => {
                if canvas_ops::resize_image(&mut self.canvas, layer, *handle, pos)? {
                    *resized = true;
                }
            }
            Gesture::Pan { .. } => {}
        }
        Ok(())
    }

    /// Finish the gesture: record it, commit history, drop sampler state.
    fn release(&mut self) -> Result<()> {
        let Some(gesture) = self.tools.end_gesture() else { return Ok(()) };
        match gesture {
            Gesture::Paint { painted: false, .. } | Gesture::Pan { .. } => {}
            Gesture::Paint { layer, config, stroke_id, points, .. } => {
                let label = format!("{} Stroke", config.tool.label());
                if config.tool == Tool::Eraser {
                    let erase = CommandKind::Erase { layer_id: layer, tool: config, points };
                    self.record_stroke(vec![erase]);
                } else {
                    let (first, rest) = (points[0], &points[1..]);
                    let (middle, last) = rest.split_at(rest.len().saturating_sub(1));
                    let mut kinds = vec![CommandKind::BeginStroke {
                        stroke_id: stroke_id.clone(),
                        layer_id: layer,
                        tool: config,
                        point: first,
                    }];
                    if !middle.is_empty() {
                        kinds.push(CommandKind::AppendPoints {
                            stroke_id: stroke_id.clone(),
                            points: middle.to_vec(),
                        });
                    }
                    let final_point = last.first().copied();
                    kinds.push(CommandKind::EndStroke { stroke_id, final_point });
                    self.record_stroke(kinds);
                }
                self.commit(&label);
            }
            Gesture::Preview { layer, config, anchor, cursor, before } => {
                let scale = self.canvas.pixel_scale;
                let target = &mut layer_buffer(&mut self.canvas, &layer)?.pixels;
                *target = before;
                if cursor == anchor {
                    return Ok(());
                }
                draw_preview_tool(target, &config, anchor, cursor, scale, false);
                let stroke_id = format!("stroke-{}", Uuid::new_v4().simple());
                let label = config.tool.label().to_string();
                self.record_stroke(vec![
                    CommandKind::BeginStroke {
                        stroke_id: stroke_id.clone(),
                        layer_id: layer,
                        tool: config,
                        point: StrokePoint::new(anchor, 0.5),
                    },
                    CommandKind::EndStroke { stroke_id, final_point: Some(StrokePoint::new(cursor, 0.5)) },
                ]);
                self.commit(&label);
            }
            Gesture::MoveImage { layer, moved, .. } => {
                if moved {
                    self.record_props(&layer);
                    self.commit("Move Image");
                }
            }
            Gesture::ResizeImage { layer, resized, .. } => {
                if resized {
                    self.record_props(&layer);
                    self.commit("Resize Image");
                }
            }
        }
        Ok(())
    }

    // ---- layers -------------------------------------------------------------

    fn record_layer_op(&mut self, operation: LayerOperation, layer: Option<LayerInfo>) {
        self.record(CommandKind::LayerOp {
            operation,
            layer,
            from_index: None,
            to_index: None,
            source_layer_id: None,
            target_layer_id: None,
        });
    }

    fn record_props(&mut self, id: &LayerId) {
        let info = self.canvas.layer(id).map(LayerInfo::from);
        self.record_layer_op(LayerOperation::UpdateProps, info);
    }

    pub fn active_layer_id(&self) -> &LayerId {
        &self.canvas.active_layer
    }

    /// Layer properties bottom to top.
    pub fn layer_infos(&self) -> Vec<LayerInfo> {
        self.canvas.z_order().into_iter().map(|i| LayerInfo::from(&self.canvas.layers[i])).collect()
    }

    pub fn create_layer(&mut self, name: Option<&str>) -> LayerId {
        let id = canvas_ops::create_layer(&mut self.canvas, name);
        let info = self.canvas.layer(&id).map(LayerInfo::from);
        self.record_layer_op(LayerOperation::Create, info);
        self.commit("Add Layer");
        id
    }

    pub fn delete_layer(&mut self, id: &LayerId) -> Result<()> {
        let info = self.canvas.layer(id).map(LayerInfo::from);
        canvas_ops::delete_layer(&mut self.canvas, id)?;
        if self.tools.selected_image.as_ref() == Some(id) {
            self.tools.selected_image = None;
        }
        self.record_layer_op(LayerOperation::Delete, info);
        self.commit("Delete Layer");
        Ok(())
    }

    /// `Ok(false)` when `id` is already the bottom layer.
    pub fn merge_down(&mut self, id: &LayerId) -> Result<bool> {
        if !canvas_ops::merge_down(&mut self.canvas, id)? {
            return Ok(false);
        }
        self.record(CommandKind::LayerOp {
            operation: LayerOperation::Merge,
            layer: None,
            from_index: None,
            to_index: None,
            source_layer_id: Some(id.clone()),
            target_layer_id: Some(self.canvas.active_layer.clone()),
        });
        self.commit("Merge Down");
        Ok(true)
    }

    pub fn set_layer_opacity(&mut self, id: &LayerId, opacity: f32) -> Result<()> {
        canvas_ops::set_opacity(&mut self.canvas, id, opacity)?;
        self.record_props(id);
        self.commit("Layer Opacity");
        Ok(())
    }

    pub fn set_layer_visible(&mut self, id: &LayerId, visible: bool) -> Result<()> {
        canvas_ops::set_visible(&mut self.canvas, id, visible)?;
        self.record_props(id);
        self.commit(if visible { "Show Layer" } else { "Hide Layer" });
        Ok(())
    }

    pub fn rename_layer(&mut self, id: &LayerId, name: &str) -> Result<()> {
        canvas_ops::rename_layer(&mut self.canvas, id, name)?;
        self.record_props(id);
        self.commit("Rename Layer");
        Ok(())
    }

    pub fn set_active_layer(&mut self, id: &LayerId) -> Result<()> {
        canvas_ops::set_active_layer(&mut self.canvas, id)
    }

    /// `Ok(false)` at the top or bottom of the stack.
    pub fn move_layer(&mut self, id: &LayerId, dir: LayerDirection) -> Result<bool> {
        let position = |canvas: &CanvasState| {
            let idx = canvas.layer_index(id).ok();
            canvas.z_order().iter().position(|&i| Some(i) == idx)
        };
        let from = position(&self.canvas);
        if !canvas_ops::move_layer(&mut self.canvas, id, dir)? {
            return Ok(false);
        }
        let to = position(&self.canvas);
        self.record(CommandKind::LayerOp {
            operation: LayerOperation::Reorder,
            layer: self.canvas.layer(id).map(LayerInfo::from),
            from_index: from,
            to_index: to,
            source_layer_id: None,
            target_layer_id: None,
        });
        self.commit("Reorder Layer");
        Ok(true)
    }

    /// Place a decoded image on a new top layer.
    pub fn import_image(&mut self, image: RgbaImage, name: Option<&str>) -> LayerId {
        let id = canvas_ops::import_image(&mut self.canvas, image, name);
        let info = self.canvas.layer(&id).map(LayerInfo::from);
        self.record_layer_op(LayerOperation::Create, info);
        self.commit("Import Image");
        id
    }

    pub fn import_image_bytes(&mut self, bytes: &[u8], name: Option<&str>) -> Result<LayerId> {
        let image = io::decode_image(bytes)?;
        Ok(self.import_image(image, name))
    }

    pub fn move_image(&mut self, id: &LayerId, delta: Vec2) -> Result<()> {
        canvas_ops::move_image(&mut self.canvas, id, delta)?;
        self.record_props(id);
        self.commit("Move Image");
        Ok(())
    }

    /// `Ok(false)` when the drag would shrink the image to 20 px or less.
    pub fn resize_image(&mut self, id: &LayerId, handle: ResizeHandle, to: Pos2) -> Result<bool> {
        if !canvas_ops::resize_image(&mut self.canvas, id, handle, to)? {
            return Ok(false);
        }
        self.record_props(id);
        self.commit("Resize Image");
        Ok(true)
    }

    /// Container resize.  Content is kept; history restarts from here.
    pub fn resize_canvas(&mut self, size: CanvasSize) {
        if size == self.canvas.size {
            return;
        }
        if self.tools.gesture.is_some() {
            self.tools.end_gesture();
        }
        canvas_ops::resize_canvas(&mut self.canvas, size);
        let mark = self.mark();
        self.history.rebase(&self.canvas, mark);
    }

    // ---- export -------------------------------------------------------------

    pub fn flatten(&self) -> RgbaImage {
        io::flatten(&self.canvas)
    }

    pub fn export_jpeg(&self) -> Result<Vec<u8>> {
        io::encode_jpeg(&self.flatten(), self.settings.export_quality)
    }

    /// Base64 JPEG of the flattened drawing, no `data:` prefix.
    pub fn export_base64(&self) -> Result<String> {
        io::export_base64(&self.canvas, self.settings.export_quality)
    }

    pub fn export_to_file(&self, path: &Path, quality: u8) -> Result<()> {
        io::encode_and_write(&self.flatten(), path, io::ExportFormat::from_path(path), quality)
    }

    pub fn preview_png_base64(&self) -> Result<String> {
        use base64::Engine as _;
        let png = io::encode_png(&self.flatten())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(png))
    }

    /// Send the current drawing for critique.  Never touches engine state.
    pub fn request_feedback(
        &self,
        client: &dyn FeedbackClient,
        answers: QuestionnaireAnswers,
    ) -> std::result::Result<FeedbackReport, FeedbackError> {
        let image = self.export_base64().map_err(|e| FeedbackError::Export(e.to_string()))?;
        feedback::submit(client, &FeedbackRequest::new(image, answers))
    }

    // ---- documents ----------------------------------------------------------

    pub fn to_document(&self) -> DrawingDocument {
        let commands = self.log.active_commands().to_vec();
        DrawingDocument {
            version: DOCUMENT_VERSION.to_string(),
            created_at: self.created_at,
            modified_at: now_millis(),
            canvas_size: self.canvas.size,
            layers: self.layer_infos(),
            strokes: self.strokes().to_vec(),
            command_history: Some(commands),
            preview: None,
            metadata: self.metadata.clone(),
        }
    }

    /// Rebuild a drawing by replaying a document's strokes and fills into a
    /// fresh session.  Layers come from the document's final layer table.
    pub fn from_document(
        doc: &DrawingDocument,
        settings: &EngineSettings,
        options: ReplayOptions,
    ) -> Result<Self> {
        let mut canvas = CanvasState::empty(doc.canvas_size, settings.device_pixel_scale);
        let (w, h) = canvas.buffer_size();
        let mut infos: Vec<&LayerInfo> = doc.layers.iter().collect();
        infos.sort_by_key(|l| l.z_index);
        for info in infos {
            let mut layer = Layer::new(info.id.clone(), info.name.clone(), w, h, info.z_index);
            layer.visible = info.visible;
            // placed-image pixels are not part of documents
            layer.opacity = info.opacity.clamp(0.0, 1.0);
            canvas.layers.push(layer);
        }
        if canvas.layers.is_empty() {
            canvas.layers.push(Layer::new(LayerId::from("layer-0"), "Background".to_string(), w, h, 0));
        }
        canvas.layer_counter = canvas.layers.len() as u32;
        if let Some(top) = canvas.z_order().last().map(|&i| canvas.layers[i].id.clone()) {
            canvas.active_layer = top;
        }

        let mut project = Self::from_canvas(canvas, settings);
        project.created_at = doc.created_at;
        project.metadata = doc.metadata.clone();
        project.replay(doc, options)?;
        let mark = project.mark();
        project.history.rebase(&project.canvas, mark);
        project.is_dirty = false;
        Ok(project)
    }

    fn replay(&mut self, doc: &DrawingDocument, options: ReplayOptions) -> Result<()> {
        let saved_tool = self.tools.active_tool;
        let saved_config = self.tools.config.clone();
        let saved_fill = self.tools.shape_fill;
        let active = self.canvas.active_layer.clone();

        match doc.command_history.as_deref() {
            Some(commands) if !commands.is_empty() => {
                // the log is bounded; strokes older than its window only live in `strokes`
                let logged: HashSet<String> =
                    strokes_from_commands(commands).into_iter().map(|s| s.id).collect();
                for stroke in doc.strokes.iter().filter(|s| !logged.contains(&s.id)) {
                    self.replay_stroke(stroke, options)?;
                }
                self.replay_commands(commands, options)?;
            }
            _ => {
                for stroke in &doc.strokes {
                    self.replay_stroke(stroke, options)?;
                }
            }
        }

        self.tools.active_tool = saved_tool;
        self.tools.config = saved_config;
        self.tools.shape_fill = saved_fill;
        if self.canvas.layer(&active).is_some() {
            self.canvas.active_layer = active;
        }
        log::info!("replayed document: {} commands logged", self.log.active_len());
        Ok(())
    }

    fn replay_commands(
        &mut self,
        commands: &[DrawingCommand],
        options: ReplayOptions,
    ) -> Result<()> {
        let mut open: Vec<Stroke> = Vec::new();
        for cmd in commands {
            match &cmd.kind {
                CommandKind::BeginStroke { .. } => {
                    open.extend(strokes_from_commands(std::slice::from_ref(cmd)));
                }
                CommandKind::AppendPoints { stroke_id, points } => {
                    if let Some(s) = open.iter_mut().find(|s| &s.id == stroke_id) {
                        s.points.extend_from_slice(points);
                    }
                }
                CommandKind::EndStroke { stroke_id, final_point } => {
                    if let Some(idx) = open.iter().position(|s| &s.id == stroke_id) {
                        let mut stroke = open.remove(idx);
                        if let Some(p) = final_point
                            && stroke.points.last() != Some(p)
                        {
                            stroke.points.push(*p);
                        }
                        self.replay_stroke(&stroke, options)?;
                    }
                }
                CommandKind::Erase { .. } => {
                    for stroke in strokes_from_commands(std::slice::from_ref(cmd)) {
                        self.replay_stroke(&stroke, options)?;
                    }
                }
                CommandKind::Fill { layer_id, point, color, .. } => {
                    if self.canvas.layer(layer_id).is_none() {
                        log::warn!("replay: fill on unknown layer {} skipped", layer_id);
                        continue;
                    }
                    self.canvas.active_layer = layer_id.clone();
                    self.tools.active_tool = Tool::Fill;
                    self.tools.config.color = *color;
                    self.press_at(Pos2::new(point.x, point.y), 0.5, false)?;
                }
                CommandKind::LayerOp { .. } => {}
            }
        }
        for stroke in open {
            self.replay_stroke(&stroke, options)?;
        }
        Ok(())
    }

    /// Drive one recorded stroke through the normal gesture path.
    fn replay_stroke(&mut self, stroke: &Stroke, options: ReplayOptions) -> Result<()> {
        let tool = stroke.tool.tool;
        if tool == Tool::Clone {
            log::warn!("replay: clone stroke {} skipped (source anchor is not recorded)", stroke.id);
            return Ok(());
        }
        if self.canvas.layer(&stroke.layer_id).is_none() {
            log::warn!("replay: stroke {} targets unknown layer {}", stroke.id, stroke.layer_id);
            return Ok(());
        }
        let (Some(first), Some(last)) = (stroke.points.first(), stroke.points.last()) else {
            return Ok(());
        };

        self.canvas.active_layer = stroke.layer_id.clone();
        self.tools.active_tool = tool;
        self.tools.config = ToolConfig { shape_fill: None, ..stroke.tool.clone() };
        if let Some(mode) = stroke.tool.shape_fill {
            self.tools.shape_fill = mode;
        }

        if tool.shape_kind().is_some() || tool == Tool::Gradient {
            self.press_at(first.pos(), first.pressure, false)?;
            self.drag_to(last.pos(), last.pressure)?;
            return self.release();
        }
        if !(tool.is_freehand() || tool == Tool::Smudge) {
            return Ok(());
        }

        let mut points = options.smoothing.apply(&stroke.points);
        if let Some(tolerance) = options.simplify {
            points = simplify_stroke(&points, tolerance);
        }
        let Some((head, tail)) = points.split_first() else { return Ok(()) };
        self.press_at(head.pos(), head.pressure, false)?;
        for p in tail {
            self.drag_to(p.pos(), p.pressure)?;
        }
        self.release()
    }

    fn drag_to(&mut self, pos: Pos2, pressure: f32) -> Result<()> {
        if self.tools.gesture.is_none() {
            return Ok(());
        }
        self.tools.pending_move = Some(PendingMove { pos, pressure });
        self.frame().map(|_| ())
    }
}

fn layer_buffer<'a>(canvas: &'a mut CanvasState, id: &LayerId) -> Result<&'a mut Layer> {
    canvas
        .layer_mut(id)
        .ok_or_else(|| {
            EngineError::InvariantViolation(format!("gesture layer {} has no buffer", id))
        })
}

/// Shape or gradient from `anchor` to `cursor`; dashed when previewing.
fn draw_preview_tool(
    target: &mut TiledImage,
    config: &ToolConfig,
    anchor: Pos2,
    cursor: Pos2,
    scale: f32,
    preview: bool,
) {
    let [r, g, b, _] = config.color.to_array();
    let color = Color32::from_rgb(r, g, b);
    if config.tool == Tool::Gradient {
        draw_linear_gradient(target, anchor, cursor, color, scale);
        return;
    }
    let Some(kind) = config.tool.shape_kind() else { return };
    let style = ShapeStyle {
        width: config.size,
        color,
        fill_mode: config.shape_fill.unwrap_or_default(),
        dashed: preview,
    };
    rasterize_shape(target, &ShapeGeometry::from_drag(kind, anchor, cursor), &style, scale);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EngineSettings {
        EngineSettings { device_pixel_scale: 1.0, ..EngineSettings::default() }
    }

    fn project(w: u32, h: u32) -> Project {
        Project::with_size(CanvasSize::new(w, h), &settings())
    }

    fn drag(p: &mut Project, from: Pos2, to: Pos2) {
        p.pointer_down(PointerEvent::primary(from)).unwrap();
        p.pointer_move(PointerEvent::primary(to));
        p.frame().unwrap();
        p.pointer_up(PointerEvent::primary(to)).unwrap();
    }

    fn alpha(p: &Project, x: u32, y: u32) -> u8 {
        p.canvas.active_layer().unwrap().pixels.get_pixel(x, y)[3]
    }

    #[test]
    fn click_without_move_paints_nothing() {
        let mut p = project(50, 50);
        p.pointer_down(PointerEvent::primary(Pos2::new(10.0, 10.0))).unwrap();
        p.pointer_up(PointerEvent::primary(Pos2::new(10.0, 10.0))).unwrap();
        assert!(!p.can_undo());
        assert_eq!(p.canvas.active_layer().unwrap().pixels.chunk_count(), 0);
    }

    #[test]
    fn only_the_latest_move_is_applied_per_frame() {
        let mut p = project(100, 100);
        p.tools.set_tool(Tool::Pencil);
        p.pointer_down(PointerEvent::primary(Pos2::new(10.0, 10.0))).unwrap();
        p.pointer_move(PointerEvent::primary(Pos2::new(80.0, 10.0)));
        p.pointer_move(PointerEvent::primary(Pos2::new(10.0, 80.0)));
        assert!(p.frame().unwrap());
        assert!(!p.frame().unwrap());
        assert_eq!(alpha(&p, 10, 50), 255);
        assert_eq!(alpha(&p, 50, 10), 0);
        p.pointer_up(PointerEvent::primary(Pos2::new(10.0, 80.0))).unwrap();
        assert_eq!(p.command_log().active_len(), 2);
    }

    #[test]
    fn pointer_up_discards_pending_move() {
        let mut p = project(100, 100);
        p.tools.set_tool(Tool::Pencil);
        p.pointer_down(PointerEvent::primary(Pos2::new(10.0, 10.0))).unwrap();
        p.pointer_move(PointerEvent::primary(Pos2::new(90.0, 10.0)));
        p.pointer_up(PointerEvent::primary(Pos2::new(90.0, 10.0))).unwrap();
        assert!(p.tools.pending_move.is_none());
        assert!(p.tools.gesture.is_none());
        assert_eq!(p.canvas.active_layer().unwrap().pixels.chunk_count(), 0);
    }

    #[test]
    fn stroke_commits_and_undoes() {
        let mut p = project(100, 100);
        p.tools.set_tool(Tool::Pencil);
        p.tools.config.size = 4.0;
        drag(&mut p, Pos2::new(10.0, 50.0), Pos2::new(90.0, 50.0));
        assert_eq!(alpha(&p, 50, 50), 255);
        assert!(p.can_undo());
        assert!(p.undo());
        assert_eq!(alpha(&p, 50, 50), 0);
        assert!(p.to_document().strokes.is_empty());
        assert!(p.redo());
        assert_eq!(alpha(&p, 50, 50), 255);
        assert_eq!(p.to_document().strokes.len(), 1);
    }

    #[test]
    fn eraser_removes_paint() {
        let mut p = project(60, 60);
        let id = p.active_layer_id().clone();
        p.canvas.layer_mut(&id).unwrap().pixels.fill(Rgba([0, 0, 0, 255]));
        p.tools.set_tool(Tool::Eraser);
        p.tools.config.size = 6.0;
        drag(&mut p, Pos2::new(5.0, 30.0), Pos2::new(55.0, 30.0));
        assert_eq!(alpha(&p, 30, 30), 0);
        assert_eq!(alpha(&p, 30, 5), 255);
        assert_eq!(p.command_log().active_commands()[0].type_name(), "ERASE");
    }

    #[test]
    fn shape_preview_is_replaced_by_solid_commit() {
        let mut p = project(100, 100);
        p.tools.set_tool(Tool::Rectangle);
        p.tools.config.size = 2.0;
        p.key_down(Key::F, Modifiers::NONE);
        p.pointer_down(PointerEvent::primary(Pos2::new(10.0, 10.0))).unwrap();
        p.pointer_move(PointerEvent::primary(Pos2::new(90.0, 90.0)));
        p.frame().unwrap();
        p.pointer_move(PointerEvent::primary(Pos2::new(40.0, 40.0)));
        p.frame().unwrap();
        p.pointer_up(PointerEvent::primary(Pos2::new(40.0, 40.0))).unwrap();
        // filled interior, nothing left from the larger preview
        assert_eq!(alpha(&p, 25, 25), 255);
        assert_eq!(alpha(&p, 70, 70), 0);
        assert_eq!(p.undo_history(), vec!["Rectangle".to_string()]);
        let strokes = p.to_document().strokes;
        assert_eq!(strokes[0].points.len(), 2);
    }

    #[test]
    fn fill_tool_fills_and_logs() {
        let mut p = project(40, 40);
        p.tools.set_tool(Tool::Fill);
        p.tools.config.color = Color32::from_rgb(0, 128, 255);
        p.pointer_down(PointerEvent::primary(Pos2::new(5.0, 5.0))).unwrap();
        p.pointer_up(PointerEvent::primary(Pos2::new(5.0, 5.0))).unwrap();
        assert_eq!(*p.canvas.active_layer().unwrap().pixels.get_pixel(39, 39), Rgba([0, 128, 255, 255]));
        assert_eq!(p.command_log().active_commands()[0].type_name(), "FILL");
        // same colour again is a no-op
        p.pointer_down(PointerEvent::primary(Pos2::new(5.0, 5.0))).unwrap();
        assert_eq!(p.command_log().len(), 1);
    }

    #[test]
    fn secondary_drag_pans_immediately() {
        let mut p = project(40, 40);
        let down = PointerEvent::primary(Pos2::new(10.0, 10.0)).with_button(PointerButton::Secondary);
        p.pointer_down(down).unwrap();
        p.pointer_move(PointerEvent::primary(Pos2::new(25.0, 5.0)));
        assert_eq!((p.view.x, p.view.y), (15.0, -5.0));
        p.pointer_up(down).unwrap();
        assert!(!p.can_undo());
    }

    #[test]
    fn middle_button_is_ignored() {
        let mut p = project(40, 40);
        p.pointer_down(PointerEvent::primary(Pos2::new(10.0, 10.0)).with_button(PointerButton::Middle)).unwrap();
        assert!(p.tools.gesture.is_none());
    }

    #[test]
    fn clone_needs_a_source() {
        let mut p = project(100, 100);
        p.tools.set_tool(Tool::Clone);
        p.pointer_down(PointerEvent::primary(Pos2::new(50.0, 50.0))).unwrap();
        assert!(p.tools.gesture.is_none());

        let alt = Modifiers { alt: true, ..Modifiers::NONE };
        p.pointer_down(PointerEvent::primary(Pos2::new(10.0, 10.0)).with_modifiers(alt)).unwrap();
        assert_eq!(p.tools.clone.source, Some(Pos2::new(10.0, 10.0)));
        p.pointer_down(PointerEvent::primary(Pos2::new(60.0, 60.0))).unwrap();
        assert_eq!(p.tools.clone.offset, Some(Vec2::new(50.0, 50.0)));
        p.pointer_cancel().unwrap();
    }

    #[test]
    fn layer_ops_are_undoable_and_logged() {
        let mut p = project(20, 20);
        let base = p.active_layer_id().clone();
        let top = p.create_layer(None);
        p.set_layer_opacity(&top, 0.4).unwrap();
        assert!(matches!(p.delete_layer(&LayerId::from("missing")), Err(EngineError::LayerNotFound(_))));
        assert!(p.undo());
        assert_eq!(p.canvas.layer(&top).unwrap().opacity, 1.0);
        assert!(p.undo());
        assert!(p.canvas.layer(&top).is_none());
        assert_eq!(p.active_layer_id(), &base);
        assert_eq!(p.command_log().active_len(), 0);
        assert!(p.redo());
        assert_eq!(p.command_log().active_len(), 1);
    }

    #[test]
    fn resize_keeps_content_and_restarts_history() {
        let mut p = project(50, 50);
        p.tools.set_tool(Tool::Pencil);
        drag(&mut p, Pos2::new(5.0, 5.0), Pos2::new(20.0, 5.0));
        p.resize_canvas(CanvasSize::new(80, 30));
        assert!(!p.can_undo());
        assert_eq!(alpha(&p, 10, 5), 255);
    }

    #[test]
    fn keyboard_undo_redo() {
        let mut p = project(50, 50);
        p.tools.set_tool(Tool::Pencil);
        drag(&mut p, Pos2::new(5.0, 5.0), Pos2::new(20.0, 5.0));
        let ctrl = Modifiers { ctrl: true, command: true, ..Modifiers::NONE };
        assert_eq!(p.key_down(Key::Z, ctrl), Some(ShortcutAction::Undo));
        assert!(!p.can_undo());
        p.key_down(Key::Y, ctrl);
        assert!(p.can_undo());
        p.key_down(Key::E, Modifiers::NONE);
        assert_eq!(p.tools.active_tool, Tool::Eraser);
    }

    #[test]
    fn document_replay_reproduces_pixels() {
        let mut p = project(60, 40);
        p.tools.set_tool(Tool::Pencil);
        p.tools.config.size = 4.0;
        drag(&mut p, Pos2::new(5.0, 20.0), Pos2::new(55.0, 20.0));
        p.tools.set_tool(Tool::Fill);
        p.tools.config.color = Color32::from_rgb(255, 0, 0);
        p.pointer_down(PointerEvent::primary(Pos2::new(2.0, 2.0))).unwrap();
        p.pointer_up(PointerEvent::primary(Pos2::new(2.0, 2.0))).unwrap();

        let doc = p.to_document();
        let replayed = Project::from_document(&doc, &settings(), ReplayOptions::default()).unwrap();
        let a = &p.canvas.active_layer().unwrap().pixels;
        let b = &replayed.canvas.active_layer().unwrap().pixels;
        assert!(a.same_pixels(b));
        assert_eq!(replayed.to_document().strokes.len(), 1);
        assert!(!replayed.is_dirty);
    }

    #[test]
    fn pointer_cancel_cleans_up_like_pointer_up() {
        let mut p = project(60, 40);
        let id = p.active_layer_id().clone();
        p.canvas.layer_mut(&id).unwrap().pixels.fill(Rgba([0, 90, 200, 255]));
        p.tools.set_tool(Tool::Smudge);
        p.tools.config.size = 10.0;

        p.pointer_down(PointerEvent::primary(Pos2::new(20.0, 20.0))).unwrap();
        assert!(p.tools.smudge.is_active());
        p.pointer_move(PointerEvent::primary(Pos2::new(25.0, 20.0)));
        p.frame().unwrap();
        p.pointer_move(PointerEvent::primary(Pos2::new(30.0, 20.0)));
        assert!(p.tools.pending_move.is_some());

        p.pointer_cancel().unwrap();
        assert!(p.tools.pending_move.is_none());
        assert!(p.tools.gesture.is_none());
        assert!(!p.tools.smudge.is_active());
        assert_eq!(p.undo_history(), vec!["Smudge Stroke".to_string()]);
        assert_eq!(p.strokes().len(), 1);
        assert_eq!(p.strokes()[0].points.len(), 2);

        p.pointer_down(PointerEvent::primary(Pos2::new(20.0, 30.0))).unwrap();
        p.pointer_move(PointerEvent::primary(Pos2::new(25.0, 30.0)));
        p.frame().unwrap();
        p.pointer_up(PointerEvent::primary(Pos2::new(25.0, 30.0))).unwrap();
        assert!(!p.tools.smudge.is_active());
        assert_eq!(p.undo_history().len(), 2);
    }

    #[test]
    fn soft_stamps_ignore_tool_opacity() {
        let mut p = project(60, 40);
        p.tools.set_tool(Tool::Brush);
        p.tools.config.size = 10.0;
        p.tools.config.hardness = 0.5;
        p.tools.config.opacity = 0.3;
        drag(&mut p, Pos2::new(20.0, 20.0), Pos2::new(40.0, 20.0));
        assert_eq!(alpha(&p, 30, 20), 255);
    }

    #[test]
    fn undo_after_the_log_overflows_drops_the_stroke() {
        let mut p = project(40, 220);
        p.tools.set_tool(Tool::Pencil);
        p.tools.config.size = 2.0;
        for i in 0..51 {
            let y = 2.0 + i as f32 * 4.0;
            drag(&mut p, Pos2::new(5.0, y), Pos2::new(35.0, y));
        }
        // two commands per stroke, bounded at 100
        assert_eq!(p.command_log().len(), 100);
        assert_eq!(p.command_log().trimmed(), 2);
        assert_eq!(p.strokes().len(), 51);

        assert!(p.undo());
        assert_eq!(p.command_log().active_len(), 98);
        assert_eq!(alpha(&p, 20, 202), 0);
        let doc = p.to_document();
        assert_eq!(doc.strokes.len(), 50);
        let last_y = doc.strokes.last().and_then(|s| s.points.last()).map(|pt| pt.y);
        assert_eq!(last_y, Some(198.0));
        let logged = strokes_from_commands(doc.command_history.as_deref().unwrap_or_default());
        assert!(logged.iter().all(|s| s.points[0].y != 202.0));

        assert!(p.redo());
        assert_eq!(p.command_log().active_len(), 100);
        assert_eq!(p.to_document().strokes.len(), 51);

        // a new stroke after undo replaces the undone one
        assert!(p.undo());
        drag(&mut p, Pos2::new(5.0, 210.0), Pos2::new(35.0, 210.0));
        assert_eq!(p.strokes().len(), 51);
        assert_eq!(p.strokes()[50].points[0].y, 210.0);
    }
}
