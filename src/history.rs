use std::collections::VecDeque;

use image::RgbaImage;

use crate::document::Canvas;

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Trait for undoable/redoable commands.
pub trait Command: Send + Sync {
    fn undo(&self, canvas: &mut Canvas);
    fn redo(&self, canvas: &mut Canvas);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// LAYER SNAPSHOT COMMAND: whole-layer undo for an applied effect
// ============================================================================

/// Stores the affected layer's pixels before and after an applied effect.
pub struct LayerSnapshotCommand {
    description: String,
    layer_index: usize,
    before_pixels: RgbaImage,
    after_pixels: Option<RgbaImage>,
}

impl LayerSnapshotCommand {
    /// Create before performing the operation. Call `set_after()` when done.
    pub fn new(description: String, layer_index: usize, before_pixels: RgbaImage) -> Self {
        Self {
            description,
            layer_index,
            before_pixels,
            after_pixels: None,
        }
    }

    /// Record the layer's pixels after the operation, used by redo.
    pub fn set_after(&mut self, after_pixels: RgbaImage) {
        self.after_pixels = Some(after_pixels);
    }
}

impl Command for LayerSnapshotCommand {
    fn undo(&self, canvas: &mut Canvas) {
        if let Some(layer) = canvas.layers.get_mut(self.layer_index) {
            layer.pixels = self.before_pixels.clone();
        }
    }

    fn redo(&self, canvas: &mut Canvas) {
        if let Some(ref after) = self.after_pixels
            && let Some(layer) = canvas.layers.get_mut(self.layer_index)
        {
            layer.pixels = after.clone();
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.before_pixels.as_raw().len()
            + self.after_pixels.as_ref().map_or(0, |p| p.as_raw().len())
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    max_memory_bytes: Option<usize>,
    /// Cached sum of `memory_size()` across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(100)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_memory_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        // A new action invalidates everything that could be redone
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }

        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);

        self.prune();
    }

    pub fn undo(&mut self, canvas: &mut Canvas) -> Option<String> {
        let command = self.undo_stack.pop_back()?;
        let description = command.description();
        command.undo(canvas);
        self.redo_stack.push_back(command);
        Some(description)
    }

    pub fn redo(&mut self, canvas: &mut Canvas) -> Option<String> {
        let command = self.redo_stack.pop_back()?;
        let description = command.description();
        command.redo(canvas);
        self.undo_stack.push_back(command);
        Some(description)
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    /// All undo descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        // Always keep the newest entry, even if it alone exceeds the budget
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn canvas_with(value: u8) -> Canvas {
        Canvas::new(4, 4, Rgba([value, value, value, 255]))
    }

    fn snapshot_cmd(canvas: &mut Canvas, label: &str, new_value: u8) -> Box<dyn Command> {
        let before = canvas.layers[0].pixels.clone();
        for p in canvas.layers[0].pixels.pixels_mut() {
            *p = Rgba([new_value, new_value, new_value, 255]);
        }
        let mut cmd = LayerSnapshotCommand::new(label.to_string(), 0, before);
        cmd.set_after(canvas.layers[0].pixels.clone());
        Box::new(cmd)
    }

    #[test]
    fn undo_and_redo_restore_layer_pixels() {
        let mut canvas = canvas_with(10);
        let mut history = HistoryManager::new(10);
        let cmd = snapshot_cmd(&mut canvas, "Invert Colors", 200);
        history.push(cmd);

        assert_eq!(history.undo(&mut canvas).as_deref(), Some("Invert Colors"));
        assert_eq!(canvas.layers[0].pixels.get_pixel(0, 0)[0], 10);
        assert!(history.can_redo());

        history.redo(&mut canvas);
        assert_eq!(canvas.layers[0].pixels.get_pixel(3, 3)[0], 200);
        assert_eq!(history.undo_count(), 1);
    }

    #[test]
    fn push_clears_redo_and_prunes_by_count() {
        let mut canvas = canvas_with(0);
        let mut history = HistoryManager::new(2);
        for (i, label) in ["a", "b", "c"].iter().enumerate() {
            let cmd = snapshot_cmd(&mut canvas, label, i as u8);
            history.push(cmd);
        }
        assert_eq!(history.undo_history(), vec!["c".to_string(), "b".to_string()]);

        history.undo(&mut canvas);
        let cmd = snapshot_cmd(&mut canvas, "d", 9);
        history.push(cmd);
        assert_eq!(history.redo_count(), 0);
    }

    #[test]
    fn memory_limit_keeps_newest_entry() {
        let mut canvas = canvas_with(0);
        let mut history = HistoryManager::new(10).with_memory_limit(Some(100));
        for label in ["a", "b", "c"] {
            let cmd = snapshot_cmd(&mut canvas, label, 1);
            history.push(cmd);
        }
        // each entry is 2 × 4×4×4 bytes = 128 bytes, over the 100 byte budget
        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.undo_description().as_deref(), Some("c"));
        assert_eq!(history.memory_usage(), 128);
    }
}
