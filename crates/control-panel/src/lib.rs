//! Multi-camera PTZ control panel: settings, per-camera sessions and the
//! HTTP surface front ends drive them through.

pub mod error;
pub mod routes;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod speed;
pub mod state;

pub use error::{ApiError, SessionError, SessionResult};
pub use routes::router;
pub use session::CameraSession;
pub use settings::{CameraSettings, Settings, SpeedSettings};
pub use speed::{motion_for, Gesture, SpeedTier};
pub use state::{build_session, AppState};
