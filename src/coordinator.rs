// ============================================================================
// COORDINATOR: single owner of a live preview's mutable state
// ============================================================================
//
// Workers and the editor only *post* messages. The owning thread pumps the
// queue with `poll`, which applies every queued message one at a time and
// then, if no worker of the current generation is still running, acts on the
// pending intent in the order cancel > apply > restart.
//
// Generation ids make cancel and restart race-free: any message tagged with
// an older generation is dropped on arrival.
// ============================================================================

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use image::RgbaImage;
use uuid::Uuid;

use crate::document::PreviewHost;
use crate::effect::{SnapshotSource, TileTarget};
use crate::error::PreviewError;
use crate::geometry::RectI;
use crate::history::LayerSnapshotCommand;
use crate::session::{PreviewEvent, RenderStatus};
use crate::settings::RenderSettings;
use crate::tiles::TileGrid;
use crate::worker::{self, CoordinatorMsg, ErrorLog, GenerationJob, TileError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No generation is running; the last one rendered to completion.
    Idle,
    /// Workers of the current generation are active.
    Rendering,
    /// A stop was requested; waiting for the workers to drain.
    Draining,
    /// Applied or cancelled. The coordinator is not reused.
    Finished,
}

#[derive(Debug, Default, Clone, Copy)]
struct Intents {
    cancel_requested: bool,
    restart_requested: bool,
    apply_requested: bool,
    session_cancelled: bool,
}

pub struct Coordinator {
    session_id: Uuid,
    state: CoordinatorState,
    generation: u64,
    intents: Intents,
    finalizing_reported: bool,

    grid: TileGrid,
    total_tiles: usize,
    rendered_tiles: usize,
    running_workers: usize,
    seen: Vec<bool>,
    cancel_flag: Arc<AtomicBool>,
    errors: ErrorLog,

    layer: usize,
    region: RectI,
    source: Arc<RgbaImage>,
    destination: RgbaImage,
    effect: Arc<dyn SnapshotSource>,
    effect_name: String,

    pool: Arc<rayon::ThreadPool>,
    thread_count: usize,
    tile_size: (u32, u32),

    sender: Sender<CoordinatorMsg>,
    receiver: Receiver<CoordinatorMsg>,
    events: Vec<PreviewEvent>,
}

impl Coordinator {
    /// Prepare a session over the host's active layer. Nothing renders until
    /// `start` is called.
    pub fn new(
        effect: Arc<dyn SnapshotSource>,
        host: &impl PreviewHost,
        settings: &RenderSettings,
        pool: Arc<rayon::ThreadPool>,
    ) -> Result<Self, PreviewError> {
        let layer = host.active_layer();
        let source = host
            .layer_pixels(layer)
            .ok_or(PreviewError::InvalidLayer(layer))?
            .clone();
        let region = host.render_bounds();
        let destination = TileTarget::from_source(&source, region).into_pixels();
        let (sender, receiver) = unbounded();
        let effect_name = effect.name();

        Ok(Self {
            session_id: Uuid::new_v4(),
            state: CoordinatorState::Idle,
            generation: 0,
            intents: Intents::default(),
            finalizing_reported: false,
            grid: TileGrid::new(region, settings.tile_width, settings.tile_height),
            total_tiles: 0,
            rendered_tiles: 0,
            running_workers: 0,
            seen: Vec::new(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            errors: ErrorLog::new(),
            layer,
            region,
            source: Arc::new(source),
            destination,
            effect,
            effect_name,
            pool,
            thread_count: settings.thread_count.max(1),
            tile_size: (settings.tile_width, settings.tile_height),
            sender,
            receiver,
            events: Vec::new(),
        })
    }

    /// Idle → Rendering with the first generation.
    pub fn start(&mut self) {
        log::info!(
            "preview {} started: {} on layer {} over {:?}",
            self.session_id,
            self.effect_name,
            self.layer,
            self.region
        );
        self.events.push(PreviewEvent::Started {
            session: self.session_id,
            bounds: self.region,
        });
        self.begin_generation();
    }

    fn begin_generation(&mut self) {
        self.generation += 1;
        let snapshot = self.effect.capture();
        self.grid = if snapshot.is_tileable() {
            TileGrid::new(self.region, self.tile_size.0, self.tile_size.1)
        } else {
            TileGrid::single(self.region)
        };
        self.total_tiles = self.grid.len();
        self.rendered_tiles = 0;
        self.seen = vec![false; self.total_tiles];
        self.cancel_flag = Arc::new(AtomicBool::new(false));
        self.errors = ErrorLog::new();
        // tiles the new generation has not reached yet show the source
        self.destination = TileTarget::from_source(&self.source, self.region).into_pixels();
        self.running_workers = self.thread_count.min(self.total_tiles);
        self.state = CoordinatorState::Rendering;

        let (tile_w, tile_h) = self.grid.tile_size();
        log::debug!(
            "preview {} gen {}: {}x{} grid of {}x{} tiles on {} workers",
            self.session_id,
            self.generation,
            self.grid.columns(),
            self.grid.rows(),
            tile_w,
            tile_h,
            self.running_workers
        );

        if self.running_workers > 0 {
            let job = GenerationJob {
                generation: self.generation,
                grid: self.grid,
                snapshot,
                source: Arc::clone(&self.source),
                cancel: Arc::clone(&self.cancel_flag),
                errors: self.errors.clone(),
                sender: self.sender.clone(),
            };
            worker::spawn_generation(&self.pool, &job, self.running_workers);
        }
    }

    /// Sender for requests from outside the owning thread.
    pub fn sender(&self) -> Sender<CoordinatorMsg> {
        self.sender.clone()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.state == CoordinatorState::Finished
    }

    pub fn render_bounds(&self) -> RectI {
        self.region
    }

    /// Preview pixels for the render region.
    pub fn destination(&self) -> &RgbaImage {
        &self.destination
    }

    /// Fraction of the current generation's tiles received so far.
    pub fn progress(&self) -> f64 {
        if self.total_tiles == 0 {
            0.0
        } else {
            self.rendered_tiles as f64 / self.total_tiles as f64
        }
    }

    /// Apply everything queued so far, then act on drained intents.
    pub fn poll(&mut self, host: &mut impl PreviewHost) -> Vec<PreviewEvent> {
        while let Ok(msg) = self.receiver.try_recv() {
            self.handle(msg);
        }
        self.evaluate(host);
        mem::take(&mut self.events)
    }

    /// Like `poll`, but waits up to `wait` for the first message.
    pub fn poll_timeout(&mut self, host: &mut impl PreviewHost, wait: Duration) -> Vec<PreviewEvent> {
        if !self.is_finished() && self.events.is_empty() && !self.ready_to_evaluate() {
            match self.receiver.recv_timeout(wait) {
                Ok(msg) => self.handle(msg),
                Err(RecvTimeoutError::Timeout) => {}
                // Unreachable while `self.sender` is alive.
                Err(RecvTimeoutError::Disconnected) => {}
            }
        }
        self.poll(host)
    }

    fn handle(&mut self, msg: CoordinatorMsg) {
        if self.is_finished() {
            return;
        }
        match msg {
            CoordinatorMsg::TileCompleted {
                generation,
                tile_index,
                bounds,
                pixels,
                error,
            } => self.on_tile_completed(generation, tile_index, bounds, pixels, error),
            CoordinatorMsg::WorkerStopped { generation } => {
                if generation != self.generation {
                    log::trace!("dropping stop from stale gen {}", generation);
                    return;
                }
                self.running_workers = self.running_workers.saturating_sub(1);
            }
            CoordinatorMsg::ParametersChanged => {
                // nothing to re-render for a session that is going away
                if self.intents.session_cancelled {
                    return;
                }
                self.intents.restart_requested = true;
                self.cancel_flag.store(true, Ordering::Release);
                self.state = CoordinatorState::Draining;
            }
            CoordinatorMsg::CancelRequested => {
                self.intents.cancel_requested = true;
                self.intents.session_cancelled = true;
                self.cancel_flag.store(true, Ordering::Release);
                self.state = CoordinatorState::Draining;
            }
            CoordinatorMsg::ApplyRequested => {
                self.intents.apply_requested = true;
                if self.running_workers > 0 && !self.finalizing_reported {
                    self.finalizing_reported = true;
                    self.events.push(PreviewEvent::Finalizing {
                        progress: self.progress(),
                    });
                }
                self.state = CoordinatorState::Draining;
            }
        }
    }

    fn on_tile_completed(
        &mut self,
        generation: u64,
        tile_index: usize,
        bounds: RectI,
        pixels: Option<RgbaImage>,
        error: Option<TileError>,
    ) {
        if generation != self.generation {
            log::trace!("dropping tile {} from stale gen {}", tile_index, generation);
            return;
        }
        match self.seen.get_mut(tile_index) {
            Some(seen) if !*seen => *seen = true,
            _ => {
                log::debug!("ignoring duplicate or unknown tile {}", tile_index);
                return;
            }
        }
        self.rendered_tiles += 1;

        // Failed tiles fall back to the source so no earlier generation's
        // output can leak into the result.
        let pixels = pixels.unwrap_or_else(|| TileTarget::from_source(&self.source, bounds).into_pixels());
        image::imageops::replace(
            &mut self.destination,
            &pixels,
            (bounds.x - self.region.x) as i64,
            (bounds.y - self.region.y) as i64,
        );
        if let Some(err) = error {
            log::debug!("gen {} recorded failure: {}", generation, err);
        }

        self.events.push(PreviewEvent::RenderProgressUpdated {
            generation,
            fraction: self.progress(),
            dirty: bounds,
        });
    }

    fn ready_to_evaluate(&self) -> bool {
        self.running_workers == 0
            && matches!(
                self.state,
                CoordinatorState::Rendering | CoordinatorState::Draining
            )
    }

    fn evaluate(&mut self, host: &mut impl PreviewHost) {
        while self.ready_to_evaluate() {
            if self.intents.cancel_requested {
                self.finish_cancelled();
            } else if self.intents.apply_requested {
                self.finish_applied(host);
            } else if self.intents.restart_requested {
                log::debug!("preview {} restarting after gen {}", self.session_id, self.generation);
                self.intents.restart_requested = false;
                self.begin_generation();
            } else {
                let errors = self.errors.snapshot();
                log::debug!(
                    "preview {} gen {} rendered ({} failed tiles)",
                    self.session_id,
                    self.generation,
                    errors.len()
                );
                self.state = CoordinatorState::Idle;
                self.events.push(PreviewEvent::RenderFinished {
                    generation: self.generation,
                    errors,
                });
            }
        }
    }

    fn finish_cancelled(&mut self) {
        self.destination = RgbaImage::new(0, 0);
        self.state = CoordinatorState::Finished;
        log::info!("preview {} cancelled", self.session_id);
        self.events.push(PreviewEvent::Ended {
            status: RenderStatus::Cancelled,
            errors: Vec::new(),
        });
    }

    fn finish_applied(&mut self, host: &mut impl PreviewHost) {
        let errors = self.errors.snapshot();
        self.state = CoordinatorState::Finished;

        let status = match self.commit(host) {
            Ok(()) if errors.is_empty() => RenderStatus::Completed,
            Ok(()) => RenderStatus::Error,
            Err(e) => {
                log::error!("preview {} could not be applied: {}", self.session_id, e);
                RenderStatus::Error
            }
        };
        log::info!(
            "preview {} applied: {:?} ({} failed tiles)",
            self.session_id,
            status,
            errors.len()
        );
        self.events.push(PreviewEvent::Ended { status, errors });
    }

    /// Merge the destination into the layer and push one undo entry.
    fn commit(&mut self, host: &mut impl PreviewHost) -> Result<(), PreviewError> {
        let before = host
            .layer_pixels(self.layer)
            .ok_or(PreviewError::InvalidLayer(self.layer))?
            .clone();
        host.merge_preview(self.layer, self.region, &self.destination)?;

        let mut command = LayerSnapshotCommand::new(self.effect_name.clone(), self.layer, before);
        if let Some(after) = host.layer_pixels(self.layer) {
            command.set_after(after.clone());
        }
        host.push_history(Box::new(command));
        Ok(())
    }
}
