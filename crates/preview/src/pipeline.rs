use crate::error::{PreviewError, Result};
use crate::frame::{resize_to_height, PreviewFrame};
use crate::slot::FrameSlot;
use crate::source::FrameSource;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics::{PREVIEW_FRAMES_PUBLISHED, PREVIEW_READ_ERRORS};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum PreviewState {
    Idle,
    Connecting,
    Streaming,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Frames are scaled to this many rows; 0 keeps the source size
    pub display_height: u32,
    /// Lower bound between two pulls
    pub min_pull_interval: Duration,
    /// Pause after a failed read before trying again
    pub read_retry_delay: Duration,
    /// Longest wait for a stream to open before giving up on it
    pub open_timeout: Duration,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            display_height: 200,
            min_pull_interval: Duration::from_millis(40),
            read_retry_delay: Duration::from_millis(500),
            open_timeout: Duration::from_secs(5),
        }
    }
}

/// Builds a fresh source for every `initialize`
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn FrameSource> + Send + Sync>;

/// Read-only view of a pipeline, usable while the pipeline itself is busy
#[derive(Debug, Clone)]
pub struct PreviewHandle {
    state: Arc<RwLock<PreviewState>>,
    slot: FrameSlot,
}

impl PreviewHandle {
    pub fn state(&self) -> PreviewState {
        self.state.read().clone()
    }

    pub fn latest(&self) -> Option<Arc<PreviewFrame>> {
        self.slot.latest()
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }
}

struct Acquisition {
    cancel: CancellationToken,
    handle: JoinHandle<Box<dyn FrameSource>>,
}

/// Background frame acquisition for one camera.
///
/// `Idle -> Connecting -> Streaming -> {Idle, Failed}`. A failed pipeline
/// only tries again on the next explicit [`initialize`](Self::initialize).
pub struct PreviewPipeline {
    camera: String,
    config: PreviewConfig,
    factory: SourceFactory,
    slot: FrameSlot,
    state: Arc<RwLock<PreviewState>>,
    acquisition: Option<Acquisition>,
}

impl PreviewPipeline {
    pub fn new(camera: impl Into<String>, config: PreviewConfig, factory: SourceFactory) -> Self {
        Self {
            camera: camera.into(),
            config,
            factory,
            slot: FrameSlot::new(),
            state: Arc::new(RwLock::new(PreviewState::Idle)),
            acquisition: None,
        }
    }

    pub fn state(&self) -> PreviewState {
        self.state.read().clone()
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    pub fn latest(&self) -> Option<Arc<PreviewFrame>> {
        self.slot.latest()
    }

    pub fn handle(&self) -> PreviewHandle {
        PreviewHandle {
            state: self.state.clone(),
            slot: self.slot.clone(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.acquisition
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }

    /// Open `url` and start the acquisition task.
    ///
    /// An empty `url` means no preview is configured: the pipeline stays
    /// `Idle` and this returns `Ok`.
    pub async fn initialize(&mut self, url: &str) -> Result<()> {
        if self.is_streaming() {
            return Err(PreviewError::AlreadyStreaming);
        }
        // Reap a task that stopped on its own
        self.stop_acquisition().await;

        let url = url.trim();
        if url.is_empty() {
            debug!(camera = %self.camera, "no preview stream configured");
            *self.state.write() = PreviewState::Idle;
            return Ok(());
        }

        *self.state.write() = PreviewState::Connecting;
        let mut source = (self.factory)();
        let opened = match time::timeout(self.config.open_timeout, source.open(url)).await {
            Ok(opened) => opened,
            Err(_) => Err(PreviewError::StreamOpen(format!(
                "stream did not open within {:?}",
                self.config.open_timeout
            ))),
        };
        if let Err(e) = opened {
            source.release().await;
            warn!(camera = %self.camera, error = %e, "preview stream unavailable");
            *self.state.write() = PreviewState::Failed(e.to_string());
            return Err(e);
        }

        info!(camera = %self.camera, "preview streaming");
        *self.state.write() = PreviewState::Streaming;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(acquire(
            source,
            self.camera.clone(),
            self.config.clone(),
            self.slot.clone(),
            self.state.clone(),
            cancel.clone(),
        ));
        self.acquisition = Some(Acquisition { cancel, handle });
        Ok(())
    }

    /// Stop the acquisition task, wait for it to exit, then release the stream.
    pub async fn close(&mut self) {
        self.stop_acquisition().await;
        self.slot.clear();
        *self.state.write() = PreviewState::Idle;
    }

    async fn stop_acquisition(&mut self) {
        let Some(acquisition) = self.acquisition.take() else {
            return;
        };
        acquisition.cancel.cancel();
        match acquisition.handle.await {
            Ok(mut source) => source.release().await,
            Err(e) => warn!(camera = %self.camera, error = %e, "preview task did not exit cleanly"),
        }
        debug!(camera = %self.camera, "preview acquisition stopped");
    }
}

impl Drop for PreviewPipeline {
    fn drop(&mut self) {
        if let Some(acquisition) = &self.acquisition {
            acquisition.cancel.cancel();
        }
    }
}

/// Pull frames until cancelled or the stream ends, then hand the source back.
async fn acquire(
    mut source: Box<dyn FrameSource>,
    camera: String,
    config: PreviewConfig,
    slot: FrameSlot,
    state: Arc<RwLock<PreviewState>>,
    cancel: CancellationToken,
) -> Box<dyn FrameSource> {
    let mut interval = time::interval(config.min_pull_interval.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let grabbed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            grabbed = source.grab() => grabbed,
        };

        match grabbed {
            Ok(image) => {
                sequence += 1;
                let image = resize_to_height(image, config.display_height);
                slot.publish(PreviewFrame::new(image, sequence));
                PREVIEW_FRAMES_PUBLISHED.with_label_values(&[camera.as_str()]).inc();
            }
            Err(PreviewError::Ended) => {
                warn!(camera = %camera, "preview stream ended");
                *state.write() = PreviewState::Failed(PreviewError::Ended.to_string());
                break;
            }
            Err(e) => {
                debug!(camera = %camera, error = %e, "preview read failed, retrying");
                PREVIEW_READ_ERRORS.with_label_values(&[camera.as_str()]).inc();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(config.read_retry_delay) => {}
                }
            }
        }
    }

    debug!(camera = %camera, frames = sequence, "preview acquisition loop exited");
    source
}
