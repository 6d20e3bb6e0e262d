// ============================================================================
// Drawly - layered raster drawing engine
// ============================================================================
//
// Leaf-first:
//   canvas      – tiled pixel buffers, layers, blend modes, view transform
//   ops         – brush stamps, shapes, flood fill, smudge/clone, layer ops, smoothing
//   components  – tools + gestures, snapshot history and the command log
//   project     – the session: event routing, frame coalescing, history commits
//   io          – flatten and encode/decode
//   document    – portable JSON drawing document
//   feedback    – critique-service request/response contract
//   settings, logger, cli – ambient configuration, session log, headless batch mode

#![allow(clippy::too_many_arguments)]
#![allow(clippy::large_enum_variant)]

pub mod canvas;
pub mod cli;
pub mod commands;
pub mod components;
pub mod document;
pub mod error;
pub mod feedback;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{
    BlendMode, CanvasSize, CanvasState, ImagePlacement, Layer, LayerId, ResizeHandle, TiledImage,
    ViewState,
};
pub use commands::{DrawingCommand, LayerInfo, Stroke, StrokePoint};
pub use components::tools::{PointerEvent, Tool, ToolConfig};
pub use document::DrawingDocument;
pub use error::{EngineError, Result};
pub use project::{Project, ReplayOptions};
pub use settings::EngineSettings;
