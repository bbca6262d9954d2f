//! Per-camera façade tying the control client, presets and preview together.

use crate::error::{SessionError, SessionResult};
use crate::settings::{CameraSettings, SpeedSettings};
use crate::speed::{motion_for, Gesture, SpeedTier};
use device_control::{
    CameraEndpoint, ControlError, DeviceCapabilities, MotionCommand, Preset, PresetStore,
    PtzDevice,
};
use parking_lot::RwLock;
use preview::{
    spawn_render, FrameSink, FrameSlot, PreviewFrame, PreviewHandle, PreviewPipeline, PreviewState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use telemetry::metrics::{self, SESSIONS_CONNECTED};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_DISPLAY_FPS: u32 = 20;

/// Copies whatever the preview holds into the display slot on every tick
struct DisplaySink {
    display: FrameSlot,
}

impl FrameSink for DisplaySink {
    fn render(&mut self, frame: Option<&Arc<PreviewFrame>>) {
        self.display.replace(frame.cloned());
    }
}

struct RenderTask {
    cancel: CancellationToken,
    handle: JoinHandle<DisplaySink>,
}

/// One configured camera.
///
/// Every call that reaches the device goes through `control`, so commands to
/// one camera never overlap and a release always lands after its press.
pub struct CameraSession {
    name: String,
    endpoint: CameraEndpoint,
    speeds: SpeedSettings,
    device: Arc<dyn PtzDevice>,
    control: Mutex<PresetStore>,
    preview: Mutex<PreviewPipeline>,
    preview_handle: PreviewHandle,
    display_fps: u32,
    display: FrameSlot,
    render: parking_lot::Mutex<Option<RenderTask>>,
    started: AtomicBool,
    status: RwLock<Option<String>>,
}

impl CameraSession {
    pub fn new(
        camera: &CameraSettings,
        speeds: SpeedSettings,
        device: Arc<dyn PtzDevice>,
        preview: PreviewPipeline,
    ) -> Self {
        Self {
            name: camera.name.clone(),
            endpoint: camera.endpoint(),
            speeds,
            device,
            control: Mutex::new(PresetStore::new(camera.hidden_presets.iter().cloned())),
            preview_handle: preview.handle(),
            preview: Mutex::new(preview),
            display_fps: DEFAULT_DISPLAY_FPS,
            display: FrameSlot::new(),
            render: parking_lot::Mutex::new(None),
            started: AtomicBool::new(false),
            status: RwLock::new(None),
        }
    }

    /// Rate at which [`display`](Self::display) is refreshed
    pub fn with_display_fps(mut self, fps: u32) -> Self {
        self.display_fps = fps.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Last human-readable problem, cleared by the next success
    pub fn status(&self) -> Option<String> {
        self.status.read().clone()
    }

    pub fn capabilities(&self) -> Option<DeviceCapabilities> {
        self.device.capabilities()
    }

    pub fn preview_state(&self) -> PreviewState {
        self.preview_handle.state()
    }

    pub fn latest_frame(&self) -> Option<Arc<PreviewFrame>> {
        self.preview_handle.latest()
    }

    pub fn preview(&self) -> &PreviewHandle {
        &self.preview_handle
    }

    pub fn display_fps(&self) -> u32 {
        self.display_fps
    }

    /// Frames as handed to the screen: rewritten on every display tick while
    /// the session runs, with the newest preview frame or the previous one.
    pub fn display(&self) -> &FrameSlot {
        &self.display
    }

    fn set_status(&self, message: Option<String>) {
        *self.status.write() = message;
    }

    fn set_started(&self, started: bool) {
        let was = self.started.swap(started, Ordering::SeqCst);
        match (was, started) {
            (false, true) => SESSIONS_CONNECTED.inc(),
            (true, false) => SESSIONS_CONNECTED.dec(),
            _ => {}
        }
    }

    /// Connect, load presets and enable commands, then bring up the preview.
    ///
    /// Returns false when the camera cannot be used; [`status`](Self::status)
    /// then says why. Calling it again reconnects from scratch.
    pub async fn start(&self) -> bool {
        {
            let mut presets = self.control.lock().await;
            self.set_started(false);

            match self.device.connect(&self.endpoint).await {
                Ok(caps) => {
                    debug!(camera = %self.name, profile = %caps.profile_token, "control session open");
                }
                Err(e) => {
                    warn!(camera = %self.name, error = %e, "camera connection failed");
                    self.set_status(Some(format!("Cannot connect to {}: {e}", self.name)));
                    return false;
                }
            }

            if let Err(e) = presets.reload(self.device.as_ref()).await {
                warn!(camera = %self.name, error = %e, "failed to load presets");
                self.set_status(Some(format!("Cannot load presets of {}: {e}", self.name)));
                return false;
            }

            self.set_started(true);
            self.set_status(None);
            info!(camera = %self.name, presets = presets.presets().len(), "camera session started");
        }

        self.start_render();

        let mut preview = self.preview.lock().await;
        if !preview.is_streaming() {
            // Reported through the status only
            let _ = self.open_preview(&mut preview).await;
        }
        true
    }

    /// Open the preview stream again, e.g. after it ended.
    pub async fn start_preview(&self) -> SessionResult<PreviewState> {
        let mut preview = self.preview.lock().await;
        self.open_preview(&mut preview).await?;
        Ok(preview.state())
    }

    async fn open_preview(&self, preview: &mut PreviewPipeline) -> SessionResult<()> {
        let url = self.endpoint.preview_url.as_deref().unwrap_or_default();
        preview.initialize(url).await.map_err(|e| {
            self.set_status(Some(format!("Preview of {} unavailable: {e}", self.name)));
            SessionError::from(e)
        })
    }

    fn start_render(&self) {
        let mut render = self.render.lock();
        if render.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let sink = DisplaySink {
            display: self.display.clone(),
        };
        let handle = spawn_render(
            self.preview_handle.slot().clone(),
            self.display_fps,
            sink,
            cancel.clone(),
        );
        *render = Some(RenderTask { cancel, handle });
        debug!(camera = %self.name, fps = self.display_fps, "render task started");
    }

    async fn stop_render(&self) {
        let Some(task) = self.render.lock().take() else {
            return;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(camera = %self.name, error = %e, "render task did not exit cleanly");
        }
        self.display.clear();
    }

    /// Tear the preview down and start again from scratch.
    pub async fn restart(&self) -> bool {
        self.preview.lock().await.close().await;
        self.start().await
    }

    /// Send `command` to the camera. Does nothing until `start` has succeeded.
    pub async fn issue(&self, command: &MotionCommand) -> SessionResult<()> {
        let _guard = self.control.lock().await;
        if !self.is_started() {
            debug!(camera = %self.name, kind = command.kind(), "session not started, command ignored");
            return Ok(());
        }

        debug!(camera = %self.name, command = ?command, "issuing command");
        let result = self.device.execute(command).await;
        metrics::record_command(&self.name, command.kind(), result.is_ok());

        match result {
            Ok(()) => {
                self.set_status(None);
                Ok(())
            }
            Err(e) => {
                warn!(camera = %self.name, kind = command.kind(), error = %e, "command failed");
                self.set_status(Some(format!("{} {} failed: {e}", self.name, command.kind())));
                Err(e.into())
            }
        }
    }

    /// Start continuous motion for a pressed control.
    pub async fn press(&self, gesture: Gesture, tier: SpeedTier) -> SessionResult<()> {
        let Some(caps) = self.device.capabilities() else {
            debug!(camera = %self.name, ?gesture, "camera not connected, press ignored");
            return Ok(());
        };
        let command = motion_for(gesture, tier, &self.speeds, &caps);
        self.issue(&command).await
    }

    /// Stop after a control is released, whatever happened to the press.
    pub async fn release(&self) -> SessionResult<()> {
        self.issue(&MotionCommand::Stop).await
    }

    fn require_started(&self) -> SessionResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(SessionError::NotStarted(self.name.clone()))
        }
    }

    /// Presets in device order, hidden ones included
    pub async fn presets(&self) -> Vec<Preset> {
        self.control.lock().await.presets().to_vec()
    }

    pub async fn reload_presets(&self) -> SessionResult<Vec<Preset>> {
        let mut store = self.control.lock().await;
        self.require_started()?;
        Ok(store.reload(self.device.as_ref()).await?.to_vec())
    }

    pub async fn goto_preset(&self, token: &str) -> SessionResult<()> {
        let store = self.control.lock().await;
        self.require_started()?;
        let result = store.goto(self.device.as_ref(), token).await;
        metrics::record_command(&self.name, "preset_goto", result.is_ok());
        Ok(result?)
    }

    /// Recall the preset at `index` in the list
    pub async fn goto_preset_index(&self, index: usize) -> SessionResult<()> {
        let store = self.control.lock().await;
        self.require_started()?;
        let result = store.goto_index(self.device.as_ref(), index).await;
        metrics::record_command(&self.name, "preset_goto", result.is_ok());
        Ok(result?)
    }

    /// Save the current position. Without a token a new preset is created,
    /// otherwise preset `token` is overwritten. Returns the preset's token.
    pub async fn save_preset(&self, name: &str, token: Option<&str>) -> SessionResult<String> {
        let mut store = self.control.lock().await;
        self.require_started()?;

        let result = match token.filter(|t| !t.is_empty()) {
            Some(token) => {
                if store.find(token).is_none() {
                    return Err(ControlError::PresetNotFound(token.to_string()).into());
                }
                store
                    .update(self.device.as_ref(), token, name)
                    .await
                    .map(|()| token.to_string())
            }
            None => store.add(self.device.as_ref(), name).await,
        };
        metrics::record_command(&self.name, "preset_set", result.is_ok());
        let token = result?;
        info!(camera = %self.name, preset = %name, token = %token, "preset saved");
        Ok(token)
    }

    pub async fn remove_preset(&self, token: &str) -> SessionResult<()> {
        let mut store = self.control.lock().await;
        self.require_started()?;
        let result = store.remove(self.device.as_ref(), token).await;
        metrics::record_command(&self.name, "preset_remove", result.is_ok());
        result?;
        info!(camera = %self.name, token = %token, "preset removed");
        Ok(())
    }

    /// Change a preset's visibility. Returns the hidden names to persist.
    pub async fn set_preset_hidden(&self, token: &str, hidden: bool) -> SessionResult<Vec<String>> {
        let mut store = self.control.lock().await;
        self.require_started()?;
        store.set_hidden(token, hidden)?;
        Ok(store.hidden_names())
    }

    /// Hidden preset names as they should be persisted
    pub async fn hidden_preset_names(&self) -> Vec<String> {
        self.control.lock().await.hidden_names()
    }

    /// Stop the preview and disable commands.
    pub async fn close(&self) {
        self.preview.lock().await.close().await;
        self.stop_render().await;
        let _guard = self.control.lock().await;
        self.set_started(false);
        debug!(camera = %self.name, "session closed");
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Some(task) = self.render.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use device_control::{DeviceCall, MockDeviceClient};
    use image::RgbImage;
    use preview::{FfmpegSource, FrameSource, PreviewConfig, SourceFactory};
    use std::time::Duration;

    fn session_with(
        device: Arc<MockDeviceClient>,
        preview_url: &str,
        config: PreviewConfig,
        factory: SourceFactory,
    ) -> CameraSession {
        let camera = CameraSettings {
            name: "cam1".to_string(),
            host: "mock".to_string(),
            port: 80,
            username: "admin".to_string(),
            password: String::new(),
            preview_url: preview_url.to_string(),
            hidden_presets: vec![],
        };
        let preview = PreviewPipeline::new("cam1", config, factory);
        CameraSession::new(&camera, SpeedSettings::default(), device, preview)
    }

    fn session(device: Arc<MockDeviceClient>) -> CameraSession {
        let factory: SourceFactory =
            Arc::new(|| Box::new(FfmpegSource::new()) as Box<dyn FrameSource>);
        session_with(device, "", PreviewConfig::default(), factory)
    }

    /// Accepts the connection and then never says anything
    struct Silent;

    #[async_trait]
    impl FrameSource for Silent {
        async fn open(&mut self, _url: &str) -> preview::Result<()> {
            std::future::pending().await
        }

        async fn grab(&mut self) -> preview::Result<RgbImage> {
            std::future::pending().await
        }

        async fn release(&mut self) {}
    }

    async fn count_display_ticks(session: &CameraSession, window: Duration) -> usize {
        let mut rx = session.display().subscribe();
        rx.borrow_and_update();
        let deadline = tokio::time::Instant::now() + window;
        let mut ticks = 0;
        while let Ok(Ok(())) = tokio::time::timeout_at(deadline, rx.changed()).await {
            ticks += 1;
        }
        ticks
    }

    #[tokio::test]
    async fn test_issue_is_noop_before_start() {
        let device = Arc::new(MockDeviceClient::new());
        let session = session(device.clone());

        session.press(Gesture::Left, SpeedTier::Fast).await.unwrap();
        session.release().await.unwrap();
        assert!(device.calls().is_empty());
        assert!(matches!(
            session.goto_preset("1").await,
            Err(SessionError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_start_failure_sets_status() {
        let device = Arc::new(MockDeviceClient::new());
        device.fail_connect(Some(ControlError::Auth("bad password".into())));
        let session = session(device.clone());

        assert!(!session.start().await);
        assert!(!session.is_started());
        let status = session.status().unwrap();
        assert!(status.contains("Cannot connect to cam1"), "{status}");
    }

    #[tokio::test]
    async fn test_press_and_release() {
        let device = Arc::new(MockDeviceClient::new());
        let session = session(device.clone());
        assert!(session.start().await);
        assert_eq!(session.preview_state(), PreviewState::Idle);
        device.clear_calls();

        session.press(Gesture::Left, SpeedTier::Fast).await.unwrap();
        session.release().await.unwrap();

        let calls = device.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            DeviceCall::Move { pan, tilt } => {
                assert!((pan - (-0.9)).abs() < 1e-6);
                assert_eq!(*tilt, 0.0);
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(calls[1], DeviceCall::Stop);
    }

    #[tokio::test]
    async fn test_close_disables_commands() {
        let device = Arc::new(MockDeviceClient::new());
        let session = session(device.clone());
        assert!(session.start().await);

        session.close().await;
        device.clear_calls();
        session.release().await.unwrap();
        assert!(device.calls().is_empty());
        assert!(!session.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_preview_does_not_block_start() {
        let device = Arc::new(MockDeviceClient::new());
        let factory: SourceFactory = Arc::new(|| Box::new(Silent) as Box<dyn FrameSource>);
        let config = PreviewConfig {
            open_timeout: Duration::from_secs(2),
            ..PreviewConfig::default()
        };
        let session = session_with(device.clone(), "rtsp://cam1/stream1", config, factory);

        let started = tokio::time::timeout(Duration::from_secs(10), session.start()).await;
        assert_eq!(started, Ok(true));
        assert!(matches!(session.preview_state(), PreviewState::Failed(_)));
        let status = session.status().unwrap();
        assert!(status.contains("Preview of cam1 unavailable"), "{status}");

        // Explicit retry reports the failure instead of hiding it
        let retried = tokio::time::timeout(Duration::from_secs(10), session.start_preview()).await;
        assert!(matches!(
            retried,
            Ok(Err(SessionError::Preview(preview::PreviewError::StreamOpen(_))))
        ));

        device.clear_calls();
        session.release().await.unwrap();
        assert_eq!(device.calls(), vec![DeviceCall::Stop]);
        tokio::time::timeout(Duration::from_secs(10), session.close())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_refreshes_at_configured_rate() {
        for fps in [5u32, 25] {
            let session = session(Arc::new(MockDeviceClient::new())).with_display_fps(fps);
            assert_eq!(session.display_fps(), fps);
            assert!(session.start().await);

            let ticks = count_display_ticks(&session, Duration::from_secs(2)).await;
            let expected = 2 * fps as usize;
            assert!(
                (expected - 1..=expected + 1).contains(&ticks),
                "{fps} fps gave {ticks} ticks in 2s"
            );

            session.close().await;
            assert_eq!(count_display_ticks(&session, Duration::from_secs(1)).await, 0);
        }
    }
}
