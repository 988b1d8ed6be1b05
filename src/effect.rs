// ============================================================================
// EFFECT CONTRACT: opaque per-tile transforms and their parameter snapshots
// ============================================================================
//
// A transform is a pure function of (source pixels, tile bounds, parameters).
// It never sees threads, generations or the document. The live parameter set
// sits behind `LiveEffect`; each render generation works from an immutable
// `EffectSnapshot` cloned out of it once, so workers never observe a
// half-updated parameter set.
// ============================================================================

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{Rgba, RgbaImage};

use crate::geometry::RectI;

/// Failure reported by a transform for a single tile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EffectError {
    #[error("{0}")]
    Failed(String),
    #[error("transform panicked: {0}")]
    Panicked(String),
}

impl EffectError {
    pub fn failed(msg: impl Into<String>) -> Self {
        EffectError::Failed(msg.into())
    }
}

/// A configurable image transform.
///
/// `render` must be reentrant: several workers call it concurrently on the
/// same instance with different tiles.
pub trait Effect: Send + Sync + 'static {
    /// Display name, also used as the undo entry label.
    fn name(&self) -> &str;

    /// `false` when the transform needs the whole render region at once.
    fn is_tileable(&self) -> bool {
        true
    }

    /// `false` for transforms with no parameters; their preview is applied
    /// as soon as it has been rendered.
    fn is_configurable(&self) -> bool {
        true
    }

    /// Render `dst.bounds()` from `src`. Only pixels inside the target may be
    /// written; reads from `src` may go anywhere in the image.
    fn render(&self, src: &RgbaImage, dst: &mut TileTarget) -> Result<(), EffectError>;
}

// ============================================================================
// TILE TARGET: the destination pixels one worker owns for one tile
// ============================================================================

/// Output buffer for a single tile, addressed in image coordinates.
///
/// Each worker renders into its own target, so no two threads ever share
/// destination memory. The coordinator copies accepted targets into the
/// session's scratch buffer.
pub struct TileTarget {
    bounds: RectI,
    pixels: RgbaImage,
}

impl TileTarget {
    /// Create a target for `bounds`, pre-filled with the matching source pixels.
    pub fn from_source(src: &RgbaImage, bounds: RectI) -> Self {
        let w = bounds.width.max(0) as u32;
        let h = bounds.height.max(0) as u32;
        let mut pixels = RgbaImage::new(w, h);
        for ly in 0..h {
            for lx in 0..w {
                let sx = bounds.x + lx as i32;
                let sy = bounds.y + ly as i32;
                if sx >= 0 && sy >= 0 && (sx as u32) < src.width() && (sy as u32) < src.height() {
                    pixels.put_pixel(lx, ly, *src.get_pixel(sx as u32, sy as u32));
                }
            }
        }
        Self { bounds, pixels }
    }

    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    pub fn get_pixel(&self, x: i32, y: i32) -> Rgba<u8> {
        debug_assert!(self.bounds.contains(x, y));
        *self
            .pixels
            .get_pixel((x - self.bounds.x) as u32, (y - self.bounds.y) as u32)
    }

    /// Write a pixel at image coordinates. Writes outside the tile are dropped.
    pub fn put_pixel(&mut self, x: i32, y: i32, px: Rgba<u8>) {
        if self.bounds.contains(x, y) {
            self.pixels
                .put_pixel((x - self.bounds.x) as u32, (y - self.bounds.y) as u32, px);
        }
    }

    /// Visit every pixel of the tile with its image coordinates.
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(i32, i32, &mut Rgba<u8>),
    {
        let (ox, oy) = (self.bounds.x, self.bounds.y);
        for (lx, ly, px) in self.pixels.enumerate_pixels_mut() {
            f(ox + lx as i32, oy + ly as i32, px);
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }
}

impl fmt::Debug for TileTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileTarget").field("bounds", &self.bounds).finish()
    }
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Immutable parameter set owned by one render generation.
#[derive(Clone)]
pub struct EffectSnapshot {
    effect: Arc<dyn Effect>,
}

impl EffectSnapshot {
    pub fn new<E: Effect>(effect: E) -> Self {
        Self {
            effect: Arc::new(effect),
        }
    }

    pub fn effect(&self) -> &dyn Effect {
        self.effect.as_ref()
    }

    pub fn name(&self) -> &str {
        self.effect.name()
    }

    pub fn is_tileable(&self) -> bool {
        self.effect.is_tileable()
    }
}

impl fmt::Debug for EffectSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectSnapshot")
            .field("effect", &self.effect.name())
            .finish()
    }
}

/// Anything that can hand out a fresh snapshot of its current parameters.
pub trait SnapshotSource: Send + Sync {
    fn capture(&self) -> EffectSnapshot;
    fn name(&self) -> String;
    fn is_configurable(&self) -> bool;
}

/// Shared, mutable parameter set edited by the parameter UI.
///
/// Editing the live effect never touches a running generation; the editor
/// calls `PreviewControl::notify_parameters_changed` afterwards and the next
/// generation captures the new values.
pub struct LiveEffect<E> {
    inner: Arc<Mutex<E>>,
}

impl<E> Clone for LiveEffect<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Effect + Clone> LiveEffect<E> {
    pub fn new(effect: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(effect)),
        }
    }

    /// Mutate the live parameters.
    pub fn update<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.lock())
    }

    /// Copy of the current parameters.
    pub fn current(&self) -> E {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, E> {
        // An editor closure that panicked cannot leave parameters half-typed
        // in a way that matters here; keep serving the last values.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Effect + Clone> SnapshotSource for LiveEffect<E> {
    fn capture(&self) -> EffectSnapshot {
        EffectSnapshot::new(self.current())
    }

    fn name(&self) -> String {
        self.lock().name().to_string()
    }

    fn is_configurable(&self) -> bool {
        self.lock().is_configurable()
    }
}
