// ============================================================================
// DRAWING DOCUMENT - portable JSON form of a drawing
// ============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasSize, LayerId};
use crate::commands::{DrawingCommand, LayerInfo, Stroke, now_millis};
use crate::error::{EngineError, Result};

pub const DOCUMENT_VERSION: &str = "1.0.0";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Any other keys, preserved as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingDocument {
    pub version: String,
    pub created_at: u64,
    pub modified_at: u64,
    pub canvas_size: CanvasSize,
    pub layers: Vec<LayerInfo>,
    pub strokes: Vec<Stroke>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_history: Option<Vec<DrawingCommand>>,
    /// Base64 PNG preview.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub layers: usize,
    pub strokes: usize,
    pub total_points: usize,
    pub tool_usage: BTreeMap<String, usize>,
    pub size_bytes: usize,
}

/// Pretty-printed JSON.
pub fn serialize_document(doc: &DrawingDocument) -> Result<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Parse and validate a document.  Missing `version`, `canvasSize`, `layers`
/// or `strokes` is a validation error; nothing partial is returned.
pub fn deserialize_document(json: &str) -> Result<DrawingDocument> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let present = |key: &str| value.get(key).is_some_and(|v| !v.is_null());

    if !value.get("version").and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty()) {
        return Err(EngineError::Validation("invalid drawing document: missing version".into()));
    }
    if !present("canvasSize") || !present("layers") || !present("strokes") {
        return Err(EngineError::Validation("invalid drawing document: missing required fields".into()));
    }
    Ok(serde_json::from_value(value)?)
}

/// A fresh document with a single `Background` layer.
pub fn create_empty_document(
    size: CanvasSize,
    metadata: Option<DocumentMetadata>,
) -> DrawingDocument {
    let now = now_millis();
    DrawingDocument {
        version: DOCUMENT_VERSION.to_string(),
        created_at: now,
        modified_at: now,
        canvas_size: size,
        layers: vec![LayerInfo {
            id: LayerId::from("layer-0"),
            name: "Background".to_string(),
            visible: true,
            opacity: 1.0,
            z_index: 0,
            image_position: None,
        }],
        strokes: Vec::new(),
        command_history: Some(Vec::new()),
        preview: None,
        metadata,
    }
}

/// Serialize without the command history, stamping a new `modifiedAt`.
pub fn export_minimal(doc: &DrawingDocument) -> Result<String> {
    let minimal = DrawingDocument { command_history: None, modified_at: now_millis(), ..doc.clone() };
    serialize_document(&minimal)
}

pub fn import_minimal(json: &str) -> Result<DrawingDocument> {
    deserialize_document(json)
}

pub fn export_layer_strokes<'a>(doc: &'a DrawingDocument, layer: &LayerId) -> Vec<&'a Stroke> {
    doc.strokes.iter().filter(|s| &s.layer_id == layer).collect()
}

pub fn document_stats(doc: &DrawingDocument) -> Result<DocumentStats> {
    let mut tool_usage = BTreeMap::new();
    for stroke in &doc.strokes {
        let name = serde_json::to_value(stroke.tool.tool)?.as_str().unwrap_or_default().to_string();
        *tool_usage.entry(name).or_insert(0) += 1;
    }
    Ok(DocumentStats {
        layers: doc.layers.len(),
        strokes: doc.strokes.len(),
        total_points: doc.strokes.iter().map(|s| s.points.len()).sum(),
        tool_usage,
        size_bytes: serde_json::to_string(doc)?.len(),
    })
}
