//! Tiled, multi-threaded live-preview rendering for PaintFE effects.
//!
//! A [`LivePreviewManager`] runs one effect at a time over the active layer
//! of a [`PreviewHost`]. Rendering is split into tiles and spread over a
//! fixed worker pool; parameter edits restart the render, and the preview
//! ends either applied (merged into the layer with one undo entry) or
//! cancelled.

pub mod cli;
pub mod coordinator;
pub mod document;
pub mod effect;
pub mod effects;
pub mod error;
pub mod geometry;
pub mod history;
pub mod logger;
pub mod session;
pub mod settings;
pub mod tiles;
pub mod worker;

pub use document::{Canvas, Document, PreviewHost, SelectionMask};
pub use effect::{Effect, EffectError, EffectSnapshot, LiveEffect, SnapshotSource, TileTarget};
pub use error::PreviewError;
pub use geometry::RectI;
pub use session::{LivePreviewManager, PreviewControl, PreviewEvent, RenderStatus};
pub use settings::RenderSettings;
pub use tiles::{Tile, TileGrid};
pub use worker::TileError;
