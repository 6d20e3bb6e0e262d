// ============================================================================
// DRAWING COMMANDS – the replayable record of what a session did
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use egui::{Color32, Pos2};
use serde::{Deserialize, Serialize};

use crate::canvas::{ImagePlacement, Layer, LayerId};
use crate::components::tools::{Tool, ToolConfig};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// One sampled pointer position in logical canvas coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
    /// 0..=1, 0.5 when the device reports none.
    #[serde(default = "default_pressure")]
    pub pressure: f32,
    #[serde(default)]
    pub timestamp: f64,
}

fn default_pressure() -> f32 {
    0.5
}

impl StrokePoint {
    pub fn new(p: Pos2, pressure: f32) -> Self {
        Self { x: p.x, y: p.y, pressure, timestamp: now_millis() as f64 }
    }

    pub fn pos(&self) -> Pos2 {
        Pos2::new(self.x, self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_point_count: Option<usize>,
}

/// A completed stroke as stored in a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: String,
    pub layer_id: LayerId,
    pub tool: ToolConfig,
    pub points: Vec<StrokePoint>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StrokeMetadata>,
}

/// Serializable layer properties (pixels are not part of documents).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub z_index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_position: Option<ImagePlacement>,
}

impl From<&Layer> for LayerInfo {
    fn from(l: &Layer) -> Self {
        Self {
            id: l.id.clone(),
            name: l.name.clone(),
            visible: l.visible,
            opacity: l.opacity,
            z_index: l.z_index,
            image_position: l.image_position,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayerOperation {
    Create,
    Delete,
    Reorder,
    Merge,
    UpdateProps,
}

pub const DEFAULT_FILL_TOLERANCE: u8 = 32;

fn default_tolerance() -> u8 {
    DEFAULT_FILL_TOLERANCE
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum CommandKind {
    BeginStroke {
        stroke_id: String,
        layer_id: LayerId,
        tool: ToolConfig,
        point: StrokePoint,
    },
    AppendPoints {
        stroke_id: String,
        points: Vec<StrokePoint>,
    },
    EndStroke {
        stroke_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_point: Option<StrokePoint>,
    },
    Erase {
        layer_id: LayerId,
        tool: ToolConfig,
        points: Vec<StrokePoint>,
    },
    Fill {
        layer_id: LayerId,
        point: Point,
        #[serde(with = "hex_color")]
        color: Color32,
        /// Carried for other consumers; the engine fills by exact match.
        #[serde(default = "default_tolerance")]
        tolerance: u8,
    },
    LayerOp {
        operation: LayerOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer: Option<LayerInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_layer_id: Option<LayerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_layer_id: Option<LayerId>,
    },
}

impl CommandKind {
    /// Wire name of the variant (`BEGIN_STROKE`, `FILL`, …).
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandKind::BeginStroke { .. } => "BEGIN_STROKE",
            CommandKind::AppendPoints { .. } => "APPEND_POINTS",
            CommandKind::EndStroke { .. } => "END_STROKE",
            CommandKind::Erase { .. } => "ERASE",
            CommandKind::Fill { .. } => "FILL",
            CommandKind::LayerOp { .. } => "LAYER_OP",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawingCommand {
    pub id: String,
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl DrawingCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self { id: format!("cmd-{}", uuid::Uuid::new_v4().simple()), timestamp: now_millis(), kind }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Fold BEGIN/APPEND/END and ERASE commands back into strokes, in order of
/// their first command.  Unfinished strokes are kept.
pub fn strokes_from_commands(commands: &[DrawingCommand]) -> Vec<Stroke> {
    let mut strokes: Vec<Stroke> = Vec::new();
    for cmd in commands {
        match &cmd.kind {
            CommandKind::BeginStroke { stroke_id, layer_id, tool, point } => strokes.push(Stroke {
                id: stroke_id.clone(),
                layer_id: layer_id.clone(),
                tool: tool.clone(),
                points: vec![*point],
                created_at: cmd.timestamp,
                metadata: None,
            }),
            CommandKind::AppendPoints { stroke_id, points } => {
                if let Some(s) = strokes.iter_mut().rev().find(|s| &s.id == stroke_id) {
                    s.points.extend_from_slice(points);
                }
            }
            CommandKind::EndStroke { stroke_id, final_point } => {
                let open = strokes.iter_mut().rev().find(|s| &s.id == stroke_id);
                if let (Some(s), Some(p)) = (open, final_point)
                    && s.points.last() != Some(p)
                {
                    s.points.push(*p);
                }
            }
            CommandKind::Erase { layer_id, tool, points } => {
                let tool = ToolConfig { tool: Tool::Eraser, ..tool.clone() };
                strokes.push(Stroke {
                    id: cmd.id.clone(),
                    layer_id: layer_id.clone(),
                    tool,
                    points: points.clone(),
                    created_at: cmd.timestamp,
                    metadata: None,
                });
            }
            CommandKind::Fill { .. } | CommandKind::LayerOp { .. } => {}
        }
    }
    strokes
}

// ============================================================================
// Hex colours on the wire
// ============================================================================

/// Parse `#RRGGBB` or `#RGB` (leading `#` optional).
pub fn parse_hex_color(s: &str) -> Option<Color32> {
    let hex = s.trim().trim_start_matches('#');
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Color32::from_rgb(byte(0)?, byte(2)?, byte(4)?)),
        3 => {
            let nib = |i: usize| u8::from_str_radix(hex.get(i..i + 1)?, 16).ok().map(|v| v * 17);
            Some(Color32::from_rgb(nib(0)?, nib(1)?, nib(2)?))
        }
        _ => None,
    }
}

pub fn to_hex_color(c: Color32) -> String {
    format!("#{:02x}{:02x}{:02x}", c.r(), c.g(), c.b())
}

pub mod hex_color {
    use egui::Color32;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(c: &Color32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::to_hex_color(*c))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Color32, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_hex_color(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid colour '{}'", s)))
    }
}
