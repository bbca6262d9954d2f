//! PTZ camera console: device control, live preview and the control panel.

pub use control_panel;
pub use device_control;
pub use preview;
pub use telemetry;
