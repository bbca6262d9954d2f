use crate::error::ApiError;
use crate::session::CameraSession;
use crate::speed::{Gesture, SpeedTier};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use device_control::{DeviceCapabilities, MotionCommand, Preset};
use preview::PreviewState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const JPEG_QUALITY: u8 = 80;
const MJPEG_BOUNDARY: &str = "frame";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/cameras", get(list_cameras))
        .route("/cameras/:name/press", post(press))
        .route("/cameras/:name/release", post(release))
        .route("/cameras/:name/commands", post(command))
        .route("/cameras/:name/presets", get(list_presets).post(save_preset))
        .route("/cameras/:name/presets/:token/goto", post(goto_preset))
        .route("/cameras/:name/presets/:token", delete(remove_preset))
        .route("/cameras/:name/presets/:token/hidden", put(set_preset_hidden))
        .route("/cameras/:name/reload-presets", post(reload_presets))
        .route("/cameras/:name/restart", post(restart))
        .route("/cameras/:name/preview", post(start_preview))
        .route("/cameras/:name/preview.jpg", get(preview_jpeg))
        .route("/cameras/:name/preview.mjpeg", get(preview_mjpeg))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct CameraSummary {
    pub name: String,
    pub started: bool,
    pub preview: PreviewState,
    pub status: Option<String>,
    pub capabilities: Option<DeviceCapabilities>,
}

impl CameraSummary {
    fn of(session: &CameraSession) -> Self {
        Self {
            name: session.name().to_string(),
            started: session.is_started(),
            preview: session.preview_state(),
            status: session.status(),
            capabilities: session.capabilities(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PressRequest {
    pub gesture: Gesture,
    #[serde(default)]
    pub tier: SpeedTier,
}

#[derive(Debug, Deserialize)]
pub struct SavePresetRequest {
    pub name: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HiddenRequest {
    pub hidden: bool,
}

fn session(state: &AppState, name: &str) -> Result<Arc<CameraSession>, ApiError> {
    state
        .session(name)
        .ok_or_else(|| ApiError::not_found(format!("camera '{name}' is not configured")))
}

fn require_started(session: &CameraSession) -> Result<(), ApiError> {
    if session.is_started() {
        Ok(())
    } else {
        Err(ApiError::Conflict(format!(
            "camera '{}' is not started",
            session.name()
        )))
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::metrics::render(),
    )
}

async fn list_cameras(State(state): State<AppState>) -> Json<Vec<CameraSummary>> {
    Json(
        state
            .sessions()
            .iter()
            .map(|s| CameraSummary::of(s))
            .collect(),
    )
}

async fn press(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &name)?;
    require_started(&session)?;
    session.press(req.gesture, req.tier).await?;
    Ok(Json(json!({"status": "ok"})))
}

/// Always attempts a stop, whatever happened to the press
async fn release(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &name)?;
    session.release().await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(command): Json<MotionCommand>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &name)?;
    require_started(&session)?;
    session.issue(&command).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn list_presets(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Preset>>, ApiError> {
    let session = session(&state, &name)?;
    Ok(Json(session.presets().await))
}

async fn save_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SavePresetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &name)?;
    let preset_name = req.name.trim();
    if preset_name.is_empty() {
        return Err(ApiError::bad_request("preset name must not be empty"));
    }

    let created = req.token.as_deref().map_or(true, str::is_empty);
    let token = session.save_preset(preset_name, req.token.as_deref()).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({"token": token}))))
}

async fn goto_preset(
    State(state): State<AppState>,
    Path((name, token)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &name)?;
    session.goto_preset(&token).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn remove_preset(
    State(state): State<AppState>,
    Path((name, token)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &name)?;
    session.remove_preset(&token).await?;
    state.persist_hidden_presets(&name, session.hidden_preset_names().await)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_preset_hidden(
    State(state): State<AppState>,
    Path((name, token)): Path<(String, String)>,
    Json(req): Json<HiddenRequest>,
) -> Result<Json<Vec<Preset>>, ApiError> {
    let session = session(&state, &name)?;
    let hidden = session.set_preset_hidden(&token, req.hidden).await?;
    state.persist_hidden_presets(&name, hidden)?;
    info!(camera = %name, token = %token, hidden = req.hidden, "preset visibility changed");
    Ok(Json(session.presets().await))
}

/// Fetch the list again from the camera and store the pruned hidden names
async fn reload_presets(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Preset>>, ApiError> {
    let session = session(&state, &name)?;
    let presets = session.reload_presets().await?;
    state.persist_hidden_presets(&name, session.hidden_preset_names().await)?;
    Ok(Json(presets))
}

async fn restart(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CameraSummary>, ApiError> {
    let session = session(&state, &name)?;
    let started = session.restart().await;
    if started {
        state.persist_hidden_presets(&name, session.hidden_preset_names().await)?;
    }
    Ok(Json(CameraSummary::of(&session)))
}

async fn preview_jpeg(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &name)?;
    let frame = session
        .latest_frame()
        .ok_or_else(|| ApiError::not_found(format!("no preview frame for camera '{name}'")))?;
    let jpeg = frame
        .to_jpeg(JPEG_QUALITY)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        jpeg,
    ))
}

/// Re-open the preview stream without touching the control session
async fn start_preview(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CameraSummary>, ApiError> {
    let session = session(&state, &name)?;
    session.start_preview().await?;
    Ok(Json(CameraSummary::of(&session)))
}

/// Motion JPEG of the display frames, one part per display tick
async fn preview_mjpeg(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &name)?;
    let frames = session.display().subscribe();

    let parts = futures::stream::unfold(frames, |mut frames| async move {
        loop {
            frames.changed().await.ok()?;
            let frame = frames.borrow_and_update().clone();
            let Some(frame) = frame else {
                continue;
            };
            match frame.to_jpeg(JPEG_QUALITY) {
                Ok(jpeg) => return Some((Ok::<_, std::io::Error>(mjpeg_part(&jpeg)), frames)),
                Err(e) => debug!(error = %e, "skipping preview frame"),
            }
        }
    });

    Ok((
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from_stream(parts),
    ))
}

fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    )
    .into_bytes();
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}
