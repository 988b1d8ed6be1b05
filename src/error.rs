use std::path::PathBuf;

/// Errors reported synchronously to callers of the preview API.
///
/// Failures inside worker threads never surface here; they travel as data
/// and are reported through `PreviewEvent::Ended`.
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("a live preview is already active")]
    AlreadyActive,
    #[error("no live preview is active")]
    NoActiveSession,
    #[error("invalid render settings: {0}")]
    InvalidSettings(String),
    #[error("layer index {0} does not exist")]
    InvalidLayer(usize),
    #[error("render worker pool could not be started: {0}")]
    WorkerPool(String),
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
