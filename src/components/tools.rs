use egui::{Color32, Key, Modifiers, PointerButton, Pos2};
use serde::{Deserialize, Serialize};

use crate::canvas::{BlendMode, LayerId, ResizeHandle, TiledImage};
use crate::commands::StrokePoint;
use crate::ops::brush::{BrushParams, StampCache};
use crate::ops::sampler::{CloneState, SmudgeState};
use crate::ops::shapes::{ShapeFillMode, ShapeKind};

// ============================================================================
// TOOLS
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Pencil,
    #[default]
    Brush,
    Eraser,
    Marker,
    Smudge,
    Clone,
    Fill,
    Gradient,
    Line,
    Rectangle,
    Circle,
    Triangle,
    Select,
    Text,
    Lasso,
    Pan,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[
            Tool::Pencil,
            Tool::Brush,
            Tool::Eraser,
            Tool::Marker,
            Tool::Smudge,
            Tool::Clone,
            Tool::Fill,
            Tool::Gradient,
            Tool::Line,
            Tool::Rectangle,
            Tool::Circle,
            Tool::Triangle,
            Tool::Select,
            Tool::Text,
            Tool::Lasso,
            Tool::Pan,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tool::Pencil => "Pencil",
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
            Tool::Marker => "Marker",
            Tool::Smudge => "Smudge",
            Tool::Clone => "Clone",
            Tool::Fill => "Fill",
            Tool::Gradient => "Gradient",
            Tool::Line => "Line",
            Tool::Rectangle => "Rectangle",
            Tool::Circle => "Circle",
            Tool::Triangle => "Triangle",
            Tool::Select => "Move/Select",
            Tool::Text => "Text",
            Tool::Lasso => "Lasso",
            Tool::Pan => "Pan",
        }
    }

    /// Shape the tool draws, if it is one of the preview/commit shape tools.
    pub fn shape_kind(&self) -> Option<ShapeKind> {
        match self {
            Tool::Line => Some(ShapeKind::Line),
            Tool::Rectangle => Some(ShapeKind::Rectangle),
            Tool::Circle => Some(ShapeKind::Circle),
            Tool::Triangle => Some(ShapeKind::Triangle),
            _ => None,
        }
    }

    /// Closed shapes honour the fill mode; lines are always stroked.
    pub fn uses_fill_mode(&self) -> bool {
        matches!(self, Tool::Rectangle | Tool::Circle | Tool::Triangle)
    }

    /// Freehand tools that paint along the pointer path.
    pub fn is_freehand(&self) -> bool {
        matches!(self, Tool::Pencil | Tool::Brush | Tool::Eraser | Tool::Marker)
    }

    /// Tools that always rasterize as a hard, round-capped line.
    pub fn is_hard_edged(&self) -> bool {
        matches!(self, Tool::Pencil | Tool::Marker | Tool::Eraser)
    }

    /// Single-letter shortcut, if any.
    pub fn shortcut(&self) -> Option<Key> {
        match self {
            Tool::Pencil => Some(Key::P),
            Tool::Brush => Some(Key::B),
            Tool::Eraser => Some(Key::E),
            Tool::Select => Some(Key::V),
            Tool::Fill => Some(Key::G),
            Tool::Text => Some(Key::T),
            Tool::Line => Some(Key::L),
            Tool::Rectangle => Some(Key::U),
            Tool::Circle => Some(Key::C),
            Tool::Triangle => Some(Key::Y),
            Tool::Lasso => Some(Key::Q),
            Tool::Pan => Some(Key::H),
            _ => None,
        }
    }
}

/// Tool parameters, recorded with every stroke.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    #[serde(rename = "type")]
    pub tool: Tool,
    /// Diameter in logical pixels.
    pub size: f32,
    #[serde(with = "crate::commands::hex_color")]
    pub color: Color32,
    pub opacity: f32,
    pub hardness: f32,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spacing: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_fill: Option<ShapeFillMode>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool: Tool::Brush,
            size: 4.0,
            color: Color32::BLACK,
            opacity: 1.0,
            hardness: 0.5,
            blend_mode: BlendMode::SourceOver,
            spacing: None,
            shape_fill: None,
        }
    }
}

impl ToolConfig {
    /// Effective blend mode: the eraser always removes alpha.
    pub fn effective_blend(&self) -> BlendMode {
        if self.tool == Tool::Eraser { BlendMode::DestinationOut } else { self.blend_mode }
    }

    pub fn brush_params(&self) -> BrushParams {
        BrushParams {
            size: self.size,
            hardness: self.hardness.clamp(0.0, 1.0),
            color: self.color,
            blend_mode: self.effective_blend(),
        }
    }

    /// Freehand strokes draw a solid line instead of stamps.
    pub fn draws_hard_line(&self) -> bool {
        self.tool.is_hard_edged() || self.hardness >= 1.0
    }
}

// ============================================================================
// KEYBOARD
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShortcutAction {
    SelectTool(Tool),
    Undo,
    Redo,
    CycleFillMode,
    /// Space is held: pointer drags pan until it is released.
    PanHold,
}

/// Map a key press to its action for the given active tool.
pub fn shortcut_action(
    key: Key,
    modifiers: Modifiers,
    active_tool: Tool,
) -> Option<ShortcutAction> {
    let command = modifiers.command || modifiers.ctrl || modifiers.mac_cmd;
    if command && !modifiers.alt {
        return match key {
            Key::Z if modifiers.shift => Some(ShortcutAction::Redo),
            Key::Z => Some(ShortcutAction::Undo),
            Key::Y if !modifiers.shift => Some(ShortcutAction::Redo),
            _ => None,
        };
    }
    if command || modifiers.alt || modifiers.shift {
        return None;
    }
    match key {
        Key::Space => Some(ShortcutAction::PanHold),
        Key::F if active_tool.uses_fill_mode() => Some(ShortcutAction::CycleFillMode),
        _ => Tool::all().iter().find(|t| t.shortcut() == Some(key)).map(|t| ShortcutAction::SelectTool(*t)),
    }
}

// ============================================================================
// POINTER INPUT + GESTURES
// ============================================================================

/// One pointer event in screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub pos: Pos2,
    pub button: PointerButton,
    pub modifiers: Modifiers,
    /// 0..=1; 0.5 when the device reports none.
    pub pressure: f32,
}

impl PointerEvent {
    pub fn primary(pos: Pos2) -> Self {
        Self { pos, button: PointerButton::Primary, modifiers: Modifiers::NONE, pressure: 0.5 }
    }

    pub fn with_button(mut self, button: PointerButton) -> Self {
        self.button = button;
        self
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// A move waiting for the next frame, in logical canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingMove {
    pub pos: Pos2,
    pub pressure: f32,
}

/// The gesture between a pointer press and its release.
pub enum Gesture {
    /// Brush, pencil, marker, eraser, smudge or clone.
    Paint {
        layer: LayerId,
        config: ToolConfig,
        stroke_id: String,
        last: Pos2,
        points: Vec<StrokePoint>,
        painted: bool,
    },
    /// Shape or gradient: the layer as it was at the press.
    Preview {
        layer: LayerId,
        config: ToolConfig,
        anchor: Pos2,
        cursor: Pos2,
        before: TiledImage,
    },
    Pan {
        last_screen: Pos2,
    },
    MoveImage {
        layer: LayerId,
        last: Pos2,
        moved: bool,
    },
    ResizeImage {
        layer: LayerId,
        handle: ResizeHandle,
        resized: bool,
    },
}

/// Everything a session keeps about tools between events.
pub struct ToolsState {
    pub active_tool: Tool,
    pub config: ToolConfig,
    pub shape_fill: ShapeFillMode,
    pub stamp_cache: StampCache,
    pub smudge: SmudgeState,
    pub clone: CloneState,
    pub space_held: bool,
    pub gesture: Option<Gesture>,
    pub pending_move: Option<PendingMove>,
    /// Layer whose placed image the select tool last picked.
    pub selected_image: Option<LayerId>,
}

impl ToolsState {
    pub fn new(stamp_cache_size: usize) -> Self {
        Self {
            active_tool: Tool::Brush,
            config: ToolConfig::default(),
            shape_fill: ShapeFillMode::Stroke,
            stamp_cache: StampCache::new(stamp_cache_size),
            smudge: SmudgeState::default(),
            clone: CloneState::default(),
            space_held: false,
            gesture: None,
            pending_move: None,
            selected_image: None,
        }
    }

    pub fn set_tool(&mut self, tool: Tool) {
        if self.active_tool != tool {
            log::debug!("tool: {}", tool.label());
        }
        self.active_tool = tool;
    }

    /// Snapshot of the tool parameters for a gesture starting now.
    pub fn current_config(&self) -> ToolConfig {
        ToolConfig {
            tool: self.active_tool,
            shape_fill: self.active_tool.uses_fill_mode().then_some(self.shape_fill),
            ..self.config.clone()
        }
    }

    pub fn cycle_fill_mode(&mut self) {
        self.shape_fill = self.shape_fill.next();
    }

    /// Should a press with these inputs pan instead of using the tool?
    pub fn wants_pan(&self, button: PointerButton) -> bool {
        button == PointerButton::Secondary || self.space_held || self.active_tool == Tool::Pan
    }

    /// Drop the gesture and everything tied to it.
    pub fn end_gesture(&mut self) -> Option<Gesture> {
        self.pending_move = None;
        self.smudge.clear();
        self.gesture.take()
    }
}
