use crate::session::CameraSession;
use crate::settings::{CameraSettings, Settings};
use anyhow::{Context, Result};
use device_control::{MockDeviceClient, OnvifDeviceClient, Preset, PtzDevice};
use futures::future::join_all;
use parking_lot::Mutex;
use preview::{FfmpegSource, FrameSource, PreviewPipeline, SourceFactory};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<Vec<Arc<CameraSession>>>,
    settings: Arc<Mutex<Settings>>,
}

impl AppState {
    pub fn new(settings: Settings, sessions: Vec<Arc<CameraSession>>) -> Self {
        Self {
            sessions: Arc::new(sessions),
            settings: Arc::new(Mutex::new(settings)),
        }
    }

    /// One session per configured camera, with ONVIF or mock devices and
    /// ffmpeg preview sources.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let sessions = settings
            .cameras
            .iter()
            .map(|camera| build_session(camera, &settings).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(settings, sessions))
    }

    /// Sessions in settings order
    pub fn sessions(&self) -> &[Arc<CameraSession>] {
        &self.sessions
    }

    pub fn session(&self, name: &str) -> Option<Arc<CameraSession>> {
        self.sessions.iter().find(|s| s.name() == name).cloned()
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// Store `names` as the hidden presets of `camera` and write the settings
    /// file if there is one.
    pub fn persist_hidden_presets(&self, camera: &str, names: Vec<String>) -> Result<()> {
        let mut settings = self.settings.lock();
        if !settings.set_hidden_presets(camera, names) {
            anyhow::bail!("camera '{camera}' is not configured");
        }
        if settings.path().is_some() {
            settings.save().context("failed to save hidden presets")?;
        }
        Ok(())
    }

    /// Start every session concurrently. Returns how many came up.
    pub async fn start_all(&self) -> usize {
        let results = join_all(self.sessions.iter().map(|s| s.start())).await;
        let started = results.iter().filter(|ok| **ok).count();
        info!(started, total = self.sessions.len(), "camera sessions started");
        started
    }

    pub async fn close_all(&self) {
        join_all(self.sessions.iter().map(|s| s.close())).await;
        info!("camera sessions closed");
    }
}

pub fn build_session(camera: &CameraSettings, settings: &Settings) -> Result<CameraSession> {
    let device: Arc<dyn PtzDevice> = if camera.is_mock() {
        Arc::new(MockDeviceClient::new().with_presets(vec![
            Preset::new("1", "Home"),
            Preset::new("2", "Wide"),
        ]))
    } else {
        Arc::new(
            OnvifDeviceClient::new(settings.device.timeout())
                .with_context(|| format!("failed to create client for camera '{}'", camera.name))?,
        )
    };

    let io_timeout = settings.preview.open_timeout();
    let factory: SourceFactory = Arc::new(move || {
        Box::new(FfmpegSource::new().with_io_timeout(io_timeout)) as Box<dyn FrameSource>
    });
    let preview = PreviewPipeline::new(&camera.name, settings.preview.pipeline_config(), factory);

    Ok(CameraSession::new(camera, settings.speeds, device, preview)
        .with_display_fps(settings.preview.display_fps))
}
