// ============================================================================
// LIVE PREVIEW SESSION: public entry point for running an effect
// ============================================================================
//
// At most one preview is live at a time. `start` hands back a `PreviewControl`
// that any thread may use to post requests; the owning thread calls `poll`
// (or `wait_until_ended`) to let the coordinator act on them and to collect
// the resulting events.
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::document::PreviewHost;
use crate::effect::SnapshotSource;
use crate::error::PreviewError;
use crate::geometry::RectI;
use crate::settings::RenderSettings;
use crate::worker::{CoordinatorMsg, TileError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderStatus {
    Completed,
    Cancelled,
    /// Applied, but at least one tile failed to render.
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PreviewEvent {
    Started {
        session: Uuid,
        bounds: RectI,
    },
    RenderProgressUpdated {
        generation: u64,
        fraction: f64,
        dirty: RectI,
    },
    /// Apply was requested while workers were still running.
    Finalizing {
        progress: f64,
    },
    /// A generation drained with nothing pending; the preview stays live.
    RenderFinished {
        generation: u64,
        errors: Vec<TileError>,
    },
    Ended {
        status: RenderStatus,
        errors: Vec<TileError>,
    },
}

impl PreviewEvent {
    pub fn is_ended(&self) -> bool {
        matches!(self, PreviewEvent::Ended { .. })
    }
}

/// Fire-and-forget requests into a running preview.
///
/// Requests posted after the preview has ended are dropped.
#[derive(Clone, Debug)]
pub struct PreviewControl {
    session: Uuid,
    sender: Sender<CoordinatorMsg>,
}

impl PreviewControl {
    pub fn session_id(&self) -> Uuid {
        self.session
    }

    /// The live parameters changed; re-render from a fresh snapshot.
    pub fn notify_parameters_changed(&self) {
        self.post(CoordinatorMsg::ParametersChanged);
    }

    pub fn request_cancel(&self) {
        self.post(CoordinatorMsg::CancelRequested);
    }

    pub fn request_apply(&self) {
        self.post(CoordinatorMsg::ApplyRequested);
    }

    fn post(&self, msg: CoordinatorMsg) {
        if self.sender.send(msg).is_err() {
            log::debug!("preview {} already ended; request dropped", self.session);
        }
    }
}

pub struct LivePreviewManager {
    settings: RenderSettings,
    pool: Arc<rayon::ThreadPool>,
    active: Option<Coordinator>,
}

impl LivePreviewManager {
    pub fn new(settings: RenderSettings) -> Result<Self, PreviewError> {
        settings.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.thread_count)
            .thread_name(|i| format!("preview-worker-{}", i))
            .build()
            .map_err(|e| PreviewError::WorkerPool(e.to_string()))?;
        Ok(Self {
            settings,
            pool: Arc::new(pool),
            active: None,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(Coordinator::session_id)
    }

    /// Progress of the current generation, 0 when nothing is live.
    pub fn progress(&self) -> f64 {
        self.active.as_ref().map_or(0.0, Coordinator::progress)
    }

    pub fn render_bounds(&self) -> Option<RectI> {
        self.active.as_ref().map(Coordinator::render_bounds)
    }

    /// Preview pixels for the render region, for drawing over the canvas.
    pub fn preview_pixels(&self) -> Option<&image::RgbaImage> {
        self.active.as_ref().map(Coordinator::destination)
    }

    /// Begin previewing `effect` on the host's active layer.
    ///
    /// Effects without parameters are applied as soon as they finish
    /// rendering.
    pub fn start(
        &mut self,
        effect: Arc<dyn SnapshotSource>,
        host: &impl PreviewHost,
    ) -> Result<PreviewControl, PreviewError> {
        if self.active.is_some() {
            return Err(PreviewError::AlreadyActive);
        }
        let configurable = effect.is_configurable();
        let mut coordinator = Coordinator::new(effect, host, &self.settings, Arc::clone(&self.pool))?;
        coordinator.start();

        let control = PreviewControl {
            session: coordinator.session_id(),
            sender: coordinator.sender(),
        };
        if !configurable {
            control.request_apply();
        }
        self.active = Some(coordinator);
        Ok(control)
    }

    /// Pump the active preview. Returns the events produced since the last
    /// call; the session is released once `Ended` has been returned.
    pub fn poll(&mut self, host: &mut impl PreviewHost) -> Vec<PreviewEvent> {
        let Some(coordinator) = self.active.as_mut() else {
            return Vec::new();
        };
        let events = coordinator.poll(host);
        if coordinator.is_finished() {
            self.active = None;
        }
        events
    }

    /// Block until the active preview ends or `timeout` elapses, returning
    /// every event seen along the way.
    pub fn wait_until_ended(
        &mut self,
        host: &mut impl PreviewHost,
        timeout: Duration,
    ) -> Result<Vec<PreviewEvent>, PreviewError> {
        let slice = Duration::from_millis(self.settings.update_interval_ms);
        self.wait_for(host, timeout, slice, PreviewEvent::is_ended)
    }

    /// Block until an event matching `done` arrives, the preview ends, or
    /// `timeout` elapses.
    pub fn wait_for<F>(
        &mut self,
        host: &mut impl PreviewHost,
        timeout: Duration,
        slice: Duration,
        mut done: F,
    ) -> Result<Vec<PreviewEvent>, PreviewError>
    where
        F: FnMut(&PreviewEvent) -> bool,
    {
        if self.active.is_none() {
            return Err(PreviewError::NoActiveSession);
        }
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        while let Some(coordinator) = self.active.as_mut() {
            let events = coordinator.poll_timeout(host, slice);
            if coordinator.is_finished() {
                self.active = None;
            }
            let hit = events.iter().any(&mut done);
            seen.extend(events);
            if hit || Instant::now() >= deadline {
                break;
            }
        }
        Ok(seen)
    }
}
