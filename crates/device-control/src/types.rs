use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where and how to reach one camera. Immutable once a session is established.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// RTSP (or any ffmpeg-readable) URL used for the live preview
    #[serde(default)]
    pub preview_url: Option<String>,
}

impl CameraEndpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            preview_url: None,
        }
    }

    pub fn with_preview_url(mut self, url: impl Into<String>) -> Self {
        self.preview_url = Some(url.into());
        self
    }

    pub fn device_service_url(&self) -> String {
        format!("http://{}:{}/onvif/device_service", self.host, self.port)
    }
}

impl fmt::Debug for CameraEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("preview_url", &self.preview_url)
            .finish()
    }
}

/// Bounds of one continuous-velocity axis as reported by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f32,
    pub max: f32,
}

impl AxisRange {
    /// The protocol's nominal `[-1, 1]` space.
    pub const NOMINAL: AxisRange = AxisRange { min: -1.0, max: 1.0 };

    /// Axis the camera does not support; every velocity clamps to rest.
    pub const FIXED: AxisRange = AxisRange { min: 0.0, max: 0.0 };

    /// Velocity spaces are symmetric around rest, so `min <= 0 <= max` must hold.
    pub fn new(min: f32, max: f32) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min > 0.0 || max < 0.0 {
            return Err(ControlError::Protocol(format!(
                "velocity range [{min}, {max}] does not contain rest"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn clamp(&self, velocity: f32) -> f32 {
        if !velocity.is_finite() {
            return 0.0;
        }
        velocity.max(self.min).min(self.max)
    }
}

impl Default for AxisRange {
    fn default() -> Self {
        Self::NOMINAL
    }
}

/// What `connect` learns about a camera. Read-only until the next reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub profile_token: String,
    pub video_source_token: String,
    pub pan: AxisRange,
    pub tilt: AxisRange,
    pub zoom: AxisRange,
}

impl DeviceCapabilities {
    /// Focus speed bounds are not discovered; the nominal space applies.
    pub fn focus(&self) -> AxisRange {
        AxisRange::NOMINAL
    }
}

/// One operator gesture translated to a device command.
///
/// Velocities are normalized to `[-1, 1]` and clamped to the discovered
/// bounds before they reach the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MotionCommand {
    Move { pan: f32, tilt: f32 },
    Zoom { velocity: f32 },
    Stop,
    Focus { velocity: f32 },
    AutoFocus,
    ManualFocus,
}

impl MotionCommand {
    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Zoom { .. } => "zoom",
            Self::Stop => "stop",
            Self::Focus { .. } => "focus",
            Self::AutoFocus => "auto_focus",
            Self::ManualFocus => "manual_focus",
        }
    }
}

/// A named position stored on the camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Device-assigned, stable across renames
    pub token: String,
    pub name: String,
    /// Client-only visibility flag, never sent to the camera
    #[serde(default)]
    pub hidden: bool,
}

impl Preset {
    pub fn new(token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            hidden: false,
        }
    }
}
