//! Live preview acquisition for PTZ cameras.
//!
//! A [`PreviewPipeline`] pulls frames from a [`FrameSource`] on a background
//! task and publishes the newest one into a [`FrameSlot`]. Renderers read the
//! slot on their own cadence with [`spawn_render`]; nothing is ever queued.

pub mod error;
pub mod frame;
pub mod pipeline;
pub mod render;
pub mod slot;
pub mod source;

pub use error::{PreviewError, Result};
pub use frame::{resize_to_height, PreviewFrame};
pub use pipeline::{PreviewConfig, PreviewHandle, PreviewPipeline, PreviewState, SourceFactory};
pub use render::{spawn_render, FrameSink};
pub use slot::FrameSlot;
pub use source::{FfmpegSource, FrameSource};
