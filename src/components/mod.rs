// ============================================================================
// COMPONENTS - session-side state: tools, gestures and history
// ============================================================================

pub mod history;
pub mod tools;
