#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use paintfe_preview::{
    Canvas, Document, Effect, EffectError, EffectSnapshot, LivePreviewManager, PreviewEvent,
    RenderSettings, SnapshotSource, TileTarget,
};

pub const WAIT: Duration = Duration::from_secs(20);

pub fn manager(threads: usize, tile: u32) -> LivePreviewManager {
    LivePreviewManager::new(RenderSettings {
        thread_count: threads,
        tile_width: tile,
        tile_height: tile,
        update_interval_ms: 5,
        ..RenderSettings::default()
    })
    .unwrap()
}

pub fn document(width: u32, height: u32, fill: Rgba<u8>) -> Document {
    Document::new(Canvas::new(width, height, fill))
}

pub fn wait_render_finished(mgr: &mut LivePreviewManager, doc: &mut Document) -> Vec<PreviewEvent> {
    let events = mgr
        .wait_for(doc, WAIT, Duration::from_millis(5), |e| {
            matches!(e, PreviewEvent::RenderFinished { .. })
        })
        .unwrap();
    assert!(
        events.iter().any(|e| matches!(e, PreviewEvent::RenderFinished { .. })),
        "render never finished: {:?}",
        events
    );
    events
}

pub fn progress_fractions(events: &[PreviewEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            PreviewEvent::RenderProgressUpdated { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect()
}

/// Fills every tile with a flat colour.
#[derive(Clone)]
pub struct Fill(pub Rgba<u8>);

impl Effect for Fill {
    fn name(&self) -> &str {
        "Fill"
    }

    fn render(&self, _src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        let c = self.0;
        dst.for_each_mut(|_, _, px| *px = c);
        Ok(())
    }
}

/// Fills tiles like `Fill`, but fails the tile with the given row-major index.
#[derive(Clone)]
pub struct FailingTile {
    pub fail_index: usize,
    pub tile: i32,
    pub columns: i32,
    pub color: Rgba<u8>,
}

impl Effect for FailingTile {
    fn name(&self) -> &str {
        "Failing Tile"
    }

    fn render(&self, _src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        let b = dst.bounds();
        let index = ((b.y / self.tile) * self.columns + b.x / self.tile) as usize;
        if index == self.fail_index {
            return Err(EffectError::failed(format!("cannot render tile {}", index)));
        }
        let c = self.color;
        dst.for_each_mut(|_, _, px| *px = c);
        Ok(())
    }
}

/// A latch that blocks rendering until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let guard = self.open.lock().unwrap();
        let _ = self
            .cond
            .wait_timeout_while(guard, WAIT, |open| !*open)
            .unwrap();
    }
}

/// Blocks on the gate, then fills the tile.
#[derive(Clone)]
pub struct Gated {
    pub gate: Arc<Gate>,
    pub color: Rgba<u8>,
}

impl Effect for Gated {
    fn name(&self) -> &str {
        "Gated"
    }

    fn render(&self, _src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError> {
        self.gate.wait();
        let c = self.color;
        dst.for_each_mut(|_, _, px| *px = c);
        Ok(())
    }
}

/// Snapshot source for `Gated` that counts how many generations captured it.
pub struct CountingSource {
    pub gate: Arc<Gate>,
    pub captures: AtomicUsize,
    pub color: Rgba<u8>,
}

impl CountingSource {
    pub fn new(color: Rgba<u8>) -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(Gate::default()),
            captures: AtomicUsize::new(0),
            color,
        })
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl SnapshotSource for CountingSource {
    fn capture(&self) -> EffectSnapshot {
        self.captures.fetch_add(1, Ordering::SeqCst);
        EffectSnapshot::new(Gated {
            gate: Arc::clone(&self.gate),
            color: self.color,
        })
    }

    fn name(&self) -> String {
        "Gated".to_string()
    }

    fn is_configurable(&self) -> bool {
        true
    }
}
