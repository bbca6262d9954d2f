//! Operator gestures and speed tiers.

use crate::settings::SpeedSettings;
use device_control::velocity::scale_to;
use device_control::{DeviceCapabilities, MotionCommand};
use serde::{Deserialize, Serialize};

/// A press on one of the panel's motion controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Up,
    Down,
    Left,
    Right,
    ZoomIn,
    ZoomOut,
    FocusNear,
    FocusFar,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTier {
    #[default]
    Slow,
    Fast,
}

impl SpeedSettings {
    pub fn move_percent(&self, tier: SpeedTier) -> f32 {
        f32::from(match tier {
            SpeedTier::Slow => self.move_slow,
            SpeedTier::Fast => self.move_fast,
        })
    }

    /// Zoom tiers also drive focus
    pub fn zoom_percent(&self, tier: SpeedTier) -> f32 {
        f32::from(match tier {
            SpeedTier::Slow => self.zoom_slow,
            SpeedTier::Fast => self.zoom_fast,
        })
    }
}

/// Build the velocity command for `gesture`, already within the camera's bounds.
pub fn motion_for(
    gesture: Gesture,
    tier: SpeedTier,
    speeds: &SpeedSettings,
    caps: &DeviceCapabilities,
) -> MotionCommand {
    let move_speed = speeds.move_percent(tier);
    let zoom_speed = speeds.zoom_percent(tier);

    match gesture {
        Gesture::Up => MotionCommand::Move {
            pan: 0.0,
            tilt: scale_to(move_speed, caps.tilt),
        },
        Gesture::Down => MotionCommand::Move {
            pan: 0.0,
            tilt: scale_to(-move_speed, caps.tilt),
        },
        Gesture::Left => MotionCommand::Move {
            pan: scale_to(-move_speed, caps.pan),
            tilt: 0.0,
        },
        Gesture::Right => MotionCommand::Move {
            pan: scale_to(move_speed, caps.pan),
            tilt: 0.0,
        },
        Gesture::ZoomIn => MotionCommand::Zoom {
            velocity: scale_to(zoom_speed, caps.zoom),
        },
        Gesture::ZoomOut => MotionCommand::Zoom {
            velocity: scale_to(-zoom_speed, caps.zoom),
        },
        Gesture::FocusNear => MotionCommand::Focus {
            velocity: scale_to(-zoom_speed, caps.focus()),
        },
        Gesture::FocusFar => MotionCommand::Focus {
            velocity: scale_to(zoom_speed, caps.focus()),
        },
    }
}
