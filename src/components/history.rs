use std::collections::VecDeque;
use std::sync::Arc;

use image::RgbaImage;

use crate::canvas::{BlendMode, CanvasSize, CanvasState, ImagePlacement, Layer, LayerId, TiledImage};
use crate::commands::DrawingCommand;

// ============================================================================
// SNAPSHOT SEAM
// ============================================================================

/// Anything whose complete state can be captured and restored verbatim.
pub trait Snapshotable {
    type Snapshot: Clone;

    fn capture(&self) -> Self::Snapshot;
    fn restore(&mut self, snapshot: &Self::Snapshot);
    /// Bytes `snapshot` holds that `previous` does not already share.
    fn snapshot_bytes(snapshot: &Self::Snapshot, previous: Option<&Self::Snapshot>) -> usize;
}

/// Full per-layer state of a canvas at one point in time.  Pixel buffers
/// share unchanged chunks with the live canvas and with other snapshots.
#[derive(Clone)]
pub struct CanvasSnapshot {
    pub size: CanvasSize,
    pub pixel_scale: f32,
    pub active_layer: LayerId,
    pub layer_counter: u32,
    pub layers: Vec<LayerSnapshot>,
}

#[derive(Clone)]
pub struct LayerSnapshot {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub z_index: i32,
    pub pixels: TiledImage,
    pub image_position: Option<ImagePlacement>,
    pub source_image: Option<Arc<RgbaImage>>,
}

impl Snapshotable for CanvasState {
    type Snapshot = CanvasSnapshot;

    fn capture(&self) -> CanvasSnapshot {
        CanvasSnapshot {
            size: self.size,
            pixel_scale: self.pixel_scale,
            active_layer: self.active_layer.clone(),
            layer_counter: self.layer_counter,
            layers: self
                .layers
                .iter()
                .map(|l| LayerSnapshot {
                    id: l.id.clone(),
                    name: l.name.clone(),
                    visible: l.visible,
                    opacity: l.opacity,
                    blend_mode: l.blend_mode,
                    z_index: l.z_index,
                    pixels: l.pixels.clone(),
                    image_position: l.image_position,
                    source_image: l.source_image.clone(),
                })
                .collect(),
        }
    }

    fn restore(&mut self, snap: &CanvasSnapshot) {
        self.size = snap.size;
        self.pixel_scale = snap.pixel_scale;
        self.active_layer = snap.active_layer.clone();
        self.layer_counter = snap.layer_counter;
        self.layers = snap
            .layers
            .iter()
            .map(|s| Layer {
                id: s.id.clone(),
                name: s.name.clone(),
                visible: s.visible,
                opacity: s.opacity,
                blend_mode: s.blend_mode,
                z_index: s.z_index,
                pixels: s.pixels.clone(),
                image_position: s.image_position,
                source_image: s.source_image.clone(),
            })
            .collect();
    }

    fn snapshot_bytes(snap: &CanvasSnapshot, previous: Option<&CanvasSnapshot>) -> usize {
        snap.layers
            .iter()
            .map(|l| {
                let prev = previous
                    .and_then(|p| p.layers.iter().find(|pl| pl.id == l.id))
                    .map(|pl| &pl.pixels);
                l.pixels.unshared_bytes(prev)
            })
            .sum()
    }
}

// ============================================================================
// HISTORY MANAGER – bounded ring of snapshots with a movable pointer
// ============================================================================

/// Positions of the command log and the stroke list that belong with a
/// snapshot.  `command_seq` counts every command ever added, so it stays
/// valid after the log drops its oldest entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistoryMark {
    pub command_seq: usize,
    pub strokes: usize,
}

struct HistoryEntry<T> {
    snapshot: T,
    label: String,
    mark: HistoryMark,
    bytes: usize,
}

/// Snapshot history.  Entry 0 is the baseline; the pointer marks the entry
/// that matches the live state.
pub struct HistoryManager<S: Snapshotable> {
    entries: VecDeque<HistoryEntry<S::Snapshot>>,
    index: usize,
    max_entries: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    total_memory: usize,
}

impl<S: Snapshotable> HistoryManager<S> {
    /// New history with `target`'s current state as the baseline.
    pub fn new(target: &S, max_entries: usize, max_memory_bytes: Option<usize>) -> Self {
        let mut history = Self {
            entries: VecDeque::new(),
            index: 0,
            max_entries: max_entries.max(1),
            max_memory_bytes,
            total_memory: 0,
        };
        history.rebase(target, HistoryMark::default());
        history
    }

    /// Drop everything and take a fresh baseline.
    pub fn rebase(&mut self, target: &S, mark: HistoryMark) {
        self.entries.clear();
        let snapshot = target.capture();
        let bytes = S::snapshot_bytes(&snapshot, None);
        self.total_memory = bytes;
        self.entries.push_back(HistoryEntry { snapshot, label: "Initial".to_string(), mark, bytes });
        self.index = 0;
    }

    /// Record the state after a completed action.  Any redo branch is discarded.
    pub fn save(&mut self, target: &S, label: &str, mark: HistoryMark) {
        while self.entries.len() > self.index + 1 {
            if let Some(dropped) = self.entries.pop_back() {
                self.total_memory = self.total_memory.saturating_sub(dropped.bytes);
            }
        }
        let snapshot = target.capture();
        let bytes = S::snapshot_bytes(&snapshot, self.entries.back().map(|e| &e.snapshot));
        self.total_memory += bytes;
        self.entries.push_back(HistoryEntry { snapshot, label: label.to_string(), mark, bytes });
        self.index = self.entries.len() - 1;
        self.prune();
    }

    fn prune(&mut self) {
        while self.entries.len() > self.max_entries {
            self.drop_oldest();
        }
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.entries.len() > 1 && self.index > 0 {
                self.drop_oldest();
            }
        }
    }

    fn drop_oldest(&mut self) {
        if let Some(removed) = self.entries.pop_front() {
            self.total_memory = self.total_memory.saturating_sub(removed.bytes);
            self.index = self.index.saturating_sub(1);
        }
    }

    /// Step back one entry and restore it.  Returns the mark recorded with
    /// the restored state.
    pub fn undo(&mut self, target: &mut S) -> Option<HistoryMark> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        let entry = &self.entries[self.index];
        target.restore(&entry.snapshot);
        Some(entry.mark)
    }

    pub fn redo(&mut self, target: &mut S) -> Option<HistoryMark> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        let entry = &self.entries[self.index];
        target.restore(&entry.snapshot);
        Some(entry.mark)
    }

    /// Undo `steps` times (stops early at the baseline).
    pub fn undo_to(&mut self, steps: usize, target: &mut S) -> Option<HistoryMark> {
        let mut last = None;
        for _ in 0..steps {
            match self.undo(target) {
                Some(n) => last = Some(n),
                None => break,
            }
        }
        last
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Labels of the undoable entries, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.entries.iter().take(self.index + 1).skip(1).rev().map(|e| e.label.clone()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }
}

// ============================================================================
// COMMAND LOG – bounded replayable command list with a pointer
// ============================================================================

pub struct CommandLog {
    commands: Vec<DrawingCommand>,
    /// Index of the last applied command, -1 when none.
    index: isize,
    max_size: usize,
    /// Commands dropped from the front so far.
    trimmed: usize,
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new(100)
    }
}

impl CommandLog {
    pub fn new(max_size: usize) -> Self {
        Self { commands: Vec::new(), index: -1, max_size: max_size.max(1), trimmed: 0 }
    }

    /// Append after the pointer, discarding anything past it, and keep only
    /// the newest `max_size` commands.
    pub fn add(&mut self, command: DrawingCommand) {
        self.commands.truncate((self.index + 1) as usize);
        self.commands.push(command);
        if self.commands.len() > self.max_size {
            let excess = self.commands.len() - self.max_size;
            self.commands.drain(..excess);
            self.trimmed += excess;
        }
        self.index = self.commands.len() as isize - 1;
    }

    pub fn undo(&mut self) -> Option<&DrawingCommand> {
        if !self.can_undo() {
            return None;
        }
        let cmd = &self.commands[self.index as usize];
        self.index -= 1;
        Some(cmd)
    }

    pub fn redo(&mut self) -> Option<&DrawingCommand> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        Some(&self.commands[self.index as usize])
    }

    pub fn can_undo(&self) -> bool {
        self.index >= 0
    }

    pub fn can_redo(&self) -> bool {
        self.index < self.commands.len() as isize - 1
    }

    /// Commands up to and including the pointer.
    pub fn active_commands(&self) -> &[DrawingCommand] {
        &self.commands[..self.active_len()]
    }

    pub fn active_len(&self) -> usize {
        (self.index + 1) as usize
    }

    /// Move the pointer so exactly `len` commands are active (clamped).
    pub fn set_active_len(&mut self, len: usize) {
        self.index = len.min(self.commands.len()) as isize - 1;
    }

    /// Active commands counted from the first command ever added.
    pub fn active_seq(&self) -> usize {
        self.trimmed + self.active_len()
    }

    /// Move the pointer to a position returned by [`active_seq`](Self::active_seq).
    /// Positions inside the dropped prefix clamp to an empty active range.
    pub fn set_active_seq(&mut self, seq: usize) {
        self.set_active_len(seq.saturating_sub(self.trimmed));
    }

    /// Number of commands dropped from the front to respect the size bound.
    pub fn trimmed(&self) -> usize {
        self.trimmed
    }

    pub fn commands_by_type(&self, type_name: &str) -> Vec<&DrawingCommand> {
        self.commands.iter().filter(|c| c.type_name() == type_name).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.index = -1;
        self.trimmed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandKind, LayerOperation};
    use image::Rgba;

    fn canvas() -> CanvasState {
        CanvasState::new(CanvasSize::new(32, 32), 1.0)
    }

    fn paint(state: &mut CanvasState, x: u32) {
        state.active_layer_mut().unwrap().pixels.put_pixel(x, 0, Rgba([255, 0, 0, 255]));
    }

    fn op() -> DrawingCommand {
        DrawingCommand::new(CommandKind::LayerOp {
            operation: LayerOperation::UpdateProps,
            layer: None,
            from_index: None,
            to_index: None,
            source_layer_id: None,
            target_layer_id: None,
        })
    }

    #[test]
    fn undo_redo_restore_identical_pixels() {
        let mut state = canvas();
        let mut history = HistoryManager::new(&state, 50, None);
        paint(&mut state, 1);
        history.save(&state, "Brush", HistoryMark::default());
        let after = state.active_layer().unwrap().pixels.clone();

        assert_eq!(history.undo(&mut state), Some(HistoryMark::default()));
        assert_eq!(state.active_layer().unwrap().pixels.get_pixel(1, 0)[3], 0);
        assert!(!history.can_undo());

        history.redo(&mut state);
        assert!(state.active_layer().unwrap().pixels.same_pixels(&after));
        assert!(!history.can_redo());
    }

    #[test]
    fn commit_after_undo_discards_redo() {
        let mut state = canvas();
        let mut history = HistoryManager::new(&state, 50, None);
        paint(&mut state, 1);
        history.save(&state, "a", HistoryMark::default());
        paint(&mut state, 2);
        history.save(&state, "b", HistoryMark::default());
        history.undo(&mut state);
        assert!(history.can_redo());
        paint(&mut state, 3);
        history.save(&state, "c", HistoryMark::default());
        assert!(!history.can_redo());
        assert_eq!(history.undo_history(), vec!["c".to_string(), "a".to_string()]);
    }

    #[test]
    fn ring_is_bounded() {
        let mut state = canvas();
        let mut history = HistoryManager::new(&state, 5, None);
        for x in 0..10 {
            paint(&mut state, x);
            history.save(&state, "dab", HistoryMark { command_seq: x as usize + 1, strokes: 0 });
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.undo_to(100, &mut state).map(|m| m.command_seq), Some(6));
        // oldest surviving entry has dabs 0..=5
        let px = &state.active_layer().unwrap().pixels;
        assert_eq!(px.get_pixel(5, 0)[3], 255);
        assert_eq!(px.get_pixel(6, 0)[3], 0);
    }

    #[test]
    fn undo_restores_layer_structure() {
        let mut state = canvas();
        let mut history = HistoryManager::new(&state, 50, None);
        let first = state.active_layer.clone();
        state.layers.push(Layer::new(LayerId::from("layer-x"), "X".into(), 32, 32, 1));
        state.active_layer = LayerId::from("layer-x");
        history.save(&state, "Add layer", HistoryMark::default());
        history.undo(&mut state);
        assert_eq!(state.layers.len(), 1);
        assert_eq!(state.active_layer, first);
    }

    #[test]
    fn memory_counts_only_new_chunks() {
        let mut state = canvas();
        let mut history = HistoryManager::new(&state, 50, None);
        assert_eq!(history.memory_usage(), 0);
        paint(&mut state, 1);
        history.save(&state, "a", HistoryMark::default());
        assert_eq!(history.memory_usage(), 64 * 64 * 4);
        history.save(&state, "same", HistoryMark::default());
        assert_eq!(history.memory_usage(), 64 * 64 * 4);
    }

    #[test]
    fn log_add_truncates_after_pointer() {
        let mut log = CommandLog::new(100);
        assert!(!log.can_undo());
        log.add(op());
        log.add(op());
        log.add(op());
        assert!(log.undo().is_some());
        assert!(log.undo().is_some());
        assert!(log.can_redo());
        log.add(op());
        assert_eq!(log.len(), 2);
        assert!(!log.can_redo());
        assert_eq!(log.active_commands().len(), 2);
    }

    #[test]
    fn log_keeps_newest_entries() {
        let mut log = CommandLog::new(3);
        let ids: Vec<String> = (0..5)
            .map(|_| {
                let c = op();
                let id = c.id.clone();
                log.add(c);
                id
            })
            .collect();
        assert_eq!(log.len(), 3);
        assert_eq!(log.active_commands()[0].id, ids[2]);
        assert_eq!(log.commands_by_type("LAYER_OP").len(), 3);
        assert!(log.commands_by_type("FILL").is_empty());
    }

    #[test]
    fn log_pointer_walks_both_ways() {
        let mut log = CommandLog::new(10);
        log.add(op());
        let id = log.undo().map(|c| c.id.clone());
        assert!(id.is_some());
        assert!(!log.can_undo());
        assert_eq!(log.redo().map(|c| c.id.clone()), id);
        log.set_active_len(0);
        assert!(log.active_commands().is_empty());
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn sequence_positions_survive_trimming() {
        let mut log = CommandLog::new(3);
        log.add(op());
        log.add(op());
        let two = log.active_seq();
        for _ in 0..4 {
            log.add(op());
        }
        assert_eq!(log.trimmed(), 3);
        assert_eq!(log.active_seq(), 6);

        log.set_active_seq(5);
        assert_eq!(log.active_len(), 2);
        log.set_active_seq(two);
        assert!(log.active_commands().is_empty());
        log.set_active_seq(6);
        assert_eq!(log.active_len(), 3);
    }
}
