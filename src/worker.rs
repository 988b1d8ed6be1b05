// ============================================================================
// WORKER POOL: strided tile loops on a fixed-size rayon pool
// ============================================================================
//
// Each generation runs `W` loops on the pool. Loop `w` renders tiles
// `w, w + W, …`, checks the generation's cancel flag before every tile, and
// posts one message per finished tile plus a final `WorkerStopped`. Workers
// never touch coordinator state; the only shared write is the append-only
// `ErrorLog`.
// ============================================================================

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::Sender;
use image::RgbaImage;

use crate::effect::{EffectError, EffectSnapshot, TileTarget};
use crate::geometry::RectI;
use crate::tiles::TileGrid;

/// A tile whose transform failed, in the form the coordinator keeps it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileError {
    pub tile_index: usize,
    pub bounds: RectI,
    pub message: String,
}

impl std::fmt::Display for TileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tile {} at ({}, {}) {}x{}: {}",
            self.tile_index,
            self.bounds.x,
            self.bounds.y,
            self.bounds.width,
            self.bounds.height,
            self.message
        )
    }
}

/// Per-generation error list. Workers append; the coordinator reads once the
/// generation has drained.
#[derive(Clone, Debug, Default)]
pub struct ErrorLog {
    inner: Arc<Mutex<Vec<TileError>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, err: TileError) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
    }

    pub fn snapshot(&self) -> Vec<TileError> {
        let mut errors = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        errors.sort_by_key(|e| e.tile_index);
        errors
    }
}

/// Everything that crosses into the coordinator's queue.
#[derive(Debug)]
pub enum CoordinatorMsg {
    TileCompleted {
        generation: u64,
        tile_index: usize,
        bounds: RectI,
        /// Rendered pixels for `bounds`; `None` when the transform failed.
        pixels: Option<RgbaImage>,
        error: Option<TileError>,
    },
    WorkerStopped {
        generation: u64,
    },
    ParametersChanged,
    CancelRequested,
    ApplyRequested,
}

/// Inputs shared by every loop of one generation.
#[derive(Clone)]
pub struct GenerationJob {
    pub generation: u64,
    pub grid: TileGrid,
    pub snapshot: EffectSnapshot,
    pub source: Arc<RgbaImage>,
    pub cancel: Arc<AtomicBool>,
    pub errors: ErrorLog,
    pub sender: Sender<CoordinatorMsg>,
}

/// Start `worker_count` loops for `job` on `pool`. Returns immediately.
pub fn spawn_generation(pool: &rayon::ThreadPool, job: &GenerationJob, worker_count: usize) {
    let worker_count = worker_count.max(1);
    for worker in 0..worker_count {
        let job = job.clone();
        pool.spawn(move || run_worker(&job, worker, worker_count));
    }
}

/// One worker loop. Public so the loop can be driven on the calling thread.
pub fn run_worker(job: &GenerationJob, worker: usize, worker_count: usize) {
    for index in job.grid.worker_indices(worker, worker_count) {
        if job.cancel.load(Ordering::Acquire) {
            log::trace!("gen {} worker {} saw cancel", job.generation, worker);
            break;
        }
        let Some(tile) = job.grid.tile(index) else { break };

        let (pixels, error) = match render_tile(&job.snapshot, &job.source, tile.bounds) {
            Ok(target) => (Some(target.into_pixels()), None),
            Err(e) => {
                log::warn!(
                    "{} failed on tile {} (gen {}): {}",
                    job.snapshot.name(),
                    index,
                    job.generation,
                    e
                );
                let err = TileError {
                    tile_index: index,
                    bounds: tile.bounds,
                    message: e.to_string(),
                };
                job.errors.push(err.clone());
                (None, Some(err))
            }
        };

        // A closed queue means the session is gone; nobody is left to tell.
        if job
            .sender
            .send(CoordinatorMsg::TileCompleted {
                generation: job.generation,
                tile_index: index,
                bounds: tile.bounds,
                pixels,
                error,
            })
            .is_err()
        {
            return;
        }
    }
    let _ = job.sender.send(CoordinatorMsg::WorkerStopped {
        generation: job.generation,
    });
}

/// Render a single tile, converting a panic in the transform into an error.
fn render_tile(
    snapshot: &EffectSnapshot,
    source: &RgbaImage,
    bounds: RectI,
) -> Result<TileTarget, EffectError> {
    let mut target = TileTarget::from_source(source, bounds);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        snapshot.effect().render(source, &mut target)
    }));
    match outcome {
        Ok(Ok(())) => Ok(target),
        Ok(Err(e)) => Err(e),
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            Err(EffectError::Panicked(msg))
        }
    }
}
