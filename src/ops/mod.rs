// ============================================================================
// OPS MODULE - pixel operations on layer buffers
// ============================================================================
//
//   brush.rs      - stamp cache and stroke stepping
//   canvas_ops.rs - layer create/delete/merge/reorder, resize, image placement
//   fill.rs       - budgeted exact-match flood fill
//   sampler.rs    - smudge and clone windows
//   shapes.rs     - shape and gradient rasterization
//   smoothing.rs  - stroke point smoothing and simplification
// ============================================================================

pub mod brush;
pub mod canvas_ops;
pub mod fill;
pub mod sampler;
pub mod shapes;
pub mod smoothing;
