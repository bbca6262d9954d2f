//! Client-side control of ONVIF PTZ cameras.
//!
//! [`OnvifDeviceClient`] owns the control session to one camera, [`velocity`]
//! maps operator speed intents onto the camera's velocity space and
//! [`PresetStore`] keeps a fresh view of the presets stored on the device.

pub mod error;
pub mod mock;
pub mod presets;
pub mod ptz_client;
pub mod soap;
pub mod types;
pub mod velocity;

pub use error::{ControlError, Result};
pub use mock::{DeviceCall, MockDeviceClient};
pub use presets::PresetStore;
pub use ptz_client::{OnvifDeviceClient, PtzDevice, DEFAULT_TIMEOUT};
pub use types::*;
