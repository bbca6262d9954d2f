//! In-memory camera for tests and for running the panel without hardware.

use crate::error::{ControlError, Result};
use crate::ptz_client::PtzDevice;
use crate::types::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// One call observed by [`MockDeviceClient`], with clamped velocities.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Connect,
    Move { pan: f32, tilt: f32 },
    Zoom(f32),
    Focus(f32),
    Stop,
    AutoFocus,
    ManualFocus,
    PresetList,
    PresetGoto(String),
    PresetAdd { name: String, token: String },
    PresetRemove(String),
}

#[derive(Debug, Default)]
struct MockState {
    capabilities: Option<DeviceCapabilities>,
    presets: Vec<Preset>,
    next_token: u32,
    calls: Vec<DeviceCall>,
    connect_failure: Option<ControlError>,
    fail_motion: bool,
    latency: Option<Duration>,
}

pub struct MockDeviceClient {
    pan: AxisRange,
    tilt: AxisRange,
    zoom: AxisRange,
    state: Mutex<MockState>,
}

impl Default for MockDeviceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeviceClient {
    /// Camera with nominal `[-1, 1]` velocity spaces on every axis
    pub fn new() -> Self {
        Self::with_bounds(AxisRange::NOMINAL, AxisRange::NOMINAL, AxisRange::NOMINAL)
    }

    pub fn with_bounds(pan: AxisRange, tilt: AxisRange, zoom: AxisRange) -> Self {
        Self {
            pan,
            tilt,
            zoom,
            state: Mutex::new(MockState {
                next_token: 1,
                ..Default::default()
            }),
        }
    }

    /// Seed presets as if they already existed on the camera
    pub fn with_presets(self, presets: Vec<Preset>) -> Self {
        {
            let mut state = self.state.lock();
            state.next_token += presets.len() as u32;
            state.presets = presets;
        }
        self
    }

    /// Make the next `connect` calls fail with `error`, or succeed again with `None`
    pub fn fail_connect(&self, error: Option<ControlError>) {
        self.state.lock().connect_failure = error;
    }

    /// Make move, zoom and focus fail. Stop keeps working.
    pub fn fail_motion(&self, fail: bool) {
        self.state.lock().fail_motion = fail;
    }

    /// Delay every call, to make overlapping commands observable
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Presets as stored on the fake camera
    pub fn stored_presets(&self) -> Vec<Preset> {
        self.state.lock().presets.clone()
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Record `call` once the session is known to be up
    fn record(&self, call: DeviceCall) -> Result<()> {
        let mut state = self.state.lock();
        if state.capabilities.is_none() {
            return Err(ControlError::NotConnected);
        }
        debug!(call = ?call, "mock camera call");
        let motion = matches!(
            call,
            DeviceCall::Move { .. } | DeviceCall::Zoom(_) | DeviceCall::Focus(_)
        );
        state.calls.push(call);
        if motion && state.fail_motion {
            return Err(ControlError::Command("mock camera rejected motion".to_string()));
        }
        Ok(())
    }

    fn connected_capabilities(&self) -> Result<DeviceCapabilities> {
        self.state
            .lock()
            .capabilities
            .clone()
            .ok_or(ControlError::NotConnected)
    }
}

#[async_trait]
impl PtzDevice for MockDeviceClient {
    async fn connect(&self, endpoint: &CameraEndpoint) -> Result<DeviceCapabilities> {
        self.state.lock().capabilities = None;
        self.simulate_latency().await;

        let mut state = self.state.lock();
        state.calls.push(DeviceCall::Connect);
        if let Some(err) = state.connect_failure.clone() {
            return Err(err);
        }

        let capabilities = DeviceCapabilities {
            profile_token: format!("{}-profile", endpoint.host),
            video_source_token: format!("{}-source", endpoint.host),
            pan: self.pan,
            tilt: self.tilt,
            zoom: self.zoom,
        };
        state.capabilities = Some(capabilities.clone());
        Ok(capabilities)
    }

    fn capabilities(&self) -> Option<DeviceCapabilities> {
        self.state.lock().capabilities.clone()
    }

    async fn move_camera(&self, pan: f32, tilt: f32) -> Result<()> {
        self.simulate_latency().await;
        let caps = self.connected_capabilities()?;
        self.record(DeviceCall::Move {
            pan: caps.pan.clamp(pan),
            tilt: caps.tilt.clamp(tilt),
        })
    }

    async fn zoom(&self, velocity: f32) -> Result<()> {
        self.simulate_latency().await;
        let caps = self.connected_capabilities()?;
        self.record(DeviceCall::Zoom(caps.zoom.clamp(velocity)))
    }

    async fn focus(&self, velocity: f32) -> Result<()> {
        self.simulate_latency().await;
        let caps = self.connected_capabilities()?;
        self.record(DeviceCall::Focus(caps.focus().clamp(velocity)))
    }

    async fn stop(&self) -> Result<()> {
        self.simulate_latency().await;
        self.record(DeviceCall::Stop)
    }

    async fn auto_focus(&self) -> Result<()> {
        self.record(DeviceCall::AutoFocus)
    }

    async fn manual_focus(&self) -> Result<()> {
        self.record(DeviceCall::ManualFocus)
    }

    async fn preset_list(&self) -> Result<Vec<Preset>> {
        self.simulate_latency().await;
        self.record(DeviceCall::PresetList)?;
        Ok(self.state.lock().presets.clone())
    }

    async fn preset_goto(&self, token: &str) -> Result<()> {
        self.record(DeviceCall::PresetGoto(token.to_string()))?;
        let known = self.state.lock().presets.iter().any(|p| p.token == token);
        if known {
            Ok(())
        } else {
            Err(ControlError::Command(format!("no preset with token {token}")))
        }
    }

    async fn preset_add(&self, name: &str, token: &str) -> Result<String> {
        self.record(DeviceCall::PresetAdd {
            name: name.to_string(),
            token: token.to_string(),
        })?;

        let mut state = self.state.lock();
        if token.is_empty() {
            let token = state.next_token.to_string();
            state.next_token += 1;
            state.presets.push(Preset::new(token.clone(), name));
            return Ok(token);
        }

        match state.presets.iter_mut().find(|p| p.token == token) {
            Some(preset) => {
                preset.name = name.to_string();
                Ok(token.to_string())
            }
            None => Err(ControlError::Command(format!("no preset with token {token}"))),
        }
    }

    async fn preset_remove(&self, token: &str) -> Result<()> {
        self.record(DeviceCall::PresetRemove(token.to_string()))?;
        let mut state = self.state.lock();
        let before = state.presets.len();
        state.presets.retain(|p| p.token != token);
        if state.presets.len() == before {
            return Err(ControlError::Command(format!("no preset with token {token}")));
        }
        Ok(())
    }
}
