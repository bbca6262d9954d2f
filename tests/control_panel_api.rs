//! HTTP surface of the control panel, backed by mock cameras.

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use control_panel::{router, AppState, CameraSession, Settings};
use device_control::{ControlError, MockDeviceClient, PtzDevice};
use image::RgbImage;
use preview::{FrameSource, PreviewError, PreviewPipeline, SourceFactory};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use telemetry::metrics::PTZ_COMMANDS;

const SETTINGS: &str = r#"
cameras:
  - name: Stage
    host: mock
    hidden_presets: [Wide]
  - name: Balcony
    host: mock
"#;

async fn start_server() -> Result<(TestServer, AppState, TempDir)> {
    telemetry::init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("settings.yaml");
    std::fs::write(&path, SETTINGS)?;

    let state = AppState::from_settings(Settings::load(&path)?)?;
    assert_eq!(state.start_all().await, 2);

    let server = TestServer::new(router(state.clone()))?;
    Ok((server, state, dir))
}

#[tokio::test]
async fn test_health_and_metrics() -> Result<()> {
    let (server, _state, _dir) = start_server().await?;

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");

    let response = server.get("/metrics").await;
    response.assert_status_ok();
    assert!(response.text().contains("camera_sessions_connected"));
    Ok(())
}

#[tokio::test]
async fn test_list_cameras() -> Result<()> {
    let (server, _state, _dir) = start_server().await?;

    let body: Value = server.get("/cameras").await.json();
    let cameras = body.as_array().cloned().unwrap_or_default();
    assert_eq!(cameras.len(), 2);
    assert_eq!(cameras[0]["name"], "Stage");
    assert_eq!(cameras[0]["started"], true);
    assert_eq!(cameras[0]["preview"]["state"], "idle");
    assert_eq!(cameras[0]["capabilities"]["pan"]["min"], -1.0);
    assert_eq!(cameras[1]["name"], "Balcony");
    Ok(())
}

#[tokio::test]
async fn test_press_release_and_raw_command() -> Result<()> {
    let (server, _state, _dir) = start_server().await?;
    let before = PTZ_COMMANDS.with_label_values(&["Stage", "move"]).get();

    server
        .post("/cameras/Stage/press")
        .json(&json!({"gesture": "left", "tier": "fast"}))
        .await
        .assert_status_ok();
    server.post("/cameras/Stage/release").await.assert_status_ok();
    server
        .post("/cameras/Stage/commands")
        .json(&json!({"type": "zoom", "velocity": 0.4}))
        .await
        .assert_status_ok();

    assert_eq!(PTZ_COMMANDS.with_label_values(&["Stage", "move"]).get(), before + 1);
    assert!(PTZ_COMMANDS.with_label_values(&["Stage", "stop"]).get() >= 1);
    assert!(PTZ_COMMANDS.with_label_values(&["Stage", "zoom"]).get() >= 1);
    Ok(())
}

#[tokio::test]
async fn test_bad_requests() -> Result<()> {
    let (server, _state, _dir) = start_server().await?;

    let response = server
        .post("/cameras/Nowhere/press")
        .json(&json!({"gesture": "up"}))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap_or_default().contains("Nowhere"));

    server
        .post("/cameras/Stage/press")
        .json(&json!({"gesture": "sideways"}))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    server
        .post("/cameras/Stage/presets")
        .json(&json!({"name": "   "}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .get("/cameras/Stage/preview.jpg")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_preset_lifecycle_persists_hidden_names() -> Result<()> {
    let (server, _state, dir) = start_server().await?;

    let presets: Value = server.get("/cameras/Stage/presets").await.json();
    assert_eq!(
        presets,
        json!([
            {"token": "1", "name": "Home", "hidden": false},
            {"token": "2", "name": "Wide", "hidden": true},
        ])
    );

    let response = server
        .post("/cameras/Stage/presets")
        .json(&json!({"name": "Pulpit"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let token = response.json::<Value>()["token"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert!(!token.is_empty());

    server
        .post("/cameras/Stage/presets")
        .json(&json!({"name": "Lectern", "token": token}))
        .await
        .assert_status_ok();

    let presets: Value = server
        .put(&format!("/cameras/Stage/presets/{token}/hidden"))
        .json(&json!({"hidden": true}))
        .await
        .json();
    assert_eq!(presets[2]["name"], "Lectern");
    assert_eq!(presets[2]["hidden"], true);

    let saved = Settings::load(dir.path().join("settings.yaml"))?;
    let stage = saved
        .camera("Stage")
        .ok_or_else(|| anyhow::anyhow!("Stage missing"))?;
    assert_eq!(stage.hidden_presets, vec!["Lectern".to_string(), "Wide".to_string()]);

    server
        .post(&format!("/cameras/Stage/presets/{token}/goto"))
        .await
        .assert_status_ok();
    server
        .delete(&format!("/cameras/Stage/presets/{token}"))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let presets: Value = server.get("/cameras/Stage/presets").await.json();
    assert_eq!(presets.as_array().map(Vec::len), Some(2));
    let saved = Settings::load(dir.path().join("settings.yaml"))?;
    assert_eq!(
        saved.camera("Stage").map(|c| c.hidden_presets.clone()),
        Some(vec!["Wide".to_string()])
    );
    Ok(())
}

struct Pattern;

#[async_trait]
impl FrameSource for Pattern {
    async fn open(&mut self, _url: &str) -> preview::Result<()> {
        Ok(())
    }

    async fn grab(&mut self) -> preview::Result<RgbImage> {
        Ok(RgbImage::from_pixel(400, 200, image::Rgb([30, 30, 30])))
    }

    async fn release(&mut self) {}
}

struct Refused;

#[async_trait]
impl FrameSource for Refused {
    async fn open(&mut self, _url: &str) -> preview::Result<()> {
        Err(PreviewError::StreamOpen("connection refused".to_string()))
    }

    async fn grab(&mut self) -> preview::Result<RgbImage> {
        Err(PreviewError::Read("not open".to_string()))
    }

    async fn release(&mut self) {}
}

fn pattern() -> SourceFactory {
    Arc::new(|| Box::new(Pattern) as Box<dyn FrameSource>)
}

fn custom_state(device: Arc<MockDeviceClient>) -> Result<AppState> {
    state_with_source(device, pattern())
}

fn state_with_source(device: Arc<MockDeviceClient>, factory: SourceFactory) -> Result<AppState> {
    let settings = Settings::parse(
        "cameras:\n  - {name: Lobby, host: mock, preview_url: 'rtsp://lobby/stream1'}\n",
    )?;
    let preview = PreviewPipeline::new("Lobby", settings.preview.pipeline_config(), factory);
    let session = CameraSession::new(&settings.cameras[0], settings.speeds, device, preview);
    Ok(AppState::new(settings, vec![Arc::new(session)]))
}

#[tokio::test]
async fn test_preview_snapshot() -> Result<()> {
    let state = custom_state(Arc::new(MockDeviceClient::new()))?;
    assert_eq!(state.start_all().await, 1);
    let session = state.session("Lobby").ok_or_else(|| anyhow::anyhow!("Lobby missing"))?;

    tokio::time::timeout(Duration::from_secs(2), async {
        while session.latest_frame().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    let server = TestServer::new(router(state.clone()))?;
    let response = server.get("/cameras/Lobby/preview.jpg").await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "image/jpeg");
    assert_eq!(&response.as_bytes()[..2], &[0xFF, 0xD8]);

    let cameras: Value = server.get("/cameras").await.json();
    assert_eq!(cameras[0]["preview"]["state"], "streaming");

    // The render task forwards the same frames to the display side
    tokio::time::timeout(Duration::from_secs(2), async {
        while session.display().latest().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    state.close_all().await;
    assert!(session.display().latest().is_none());
    Ok(())
}

#[tokio::test]
async fn test_reload_presets_from_camera() -> Result<()> {
    let device = Arc::new(MockDeviceClient::new());
    let state = custom_state(device.clone())?;
    assert_eq!(state.start_all().await, 1);
    let server = TestServer::new(router(state.clone()))?;

    let presets: Value = server.get("/cameras/Lobby/presets").await.json();
    assert_eq!(presets, json!([]));

    // Saved from another console
    device.preset_add("Gallery", "").await?;
    let response = server.post("/cameras/Lobby/reload-presets").await;
    response.assert_status_ok();
    let presets: Value = response.json();
    assert_eq!(presets.as_array().map(Vec::len), Some(1));
    assert_eq!(presets[0]["name"], "Gallery");

    state.close_all().await;
    server
        .post("/cameras/Lobby/reload-presets")
        .await
        .assert_status(StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn test_reopen_preview() -> Result<()> {
    let state = custom_state(Arc::new(MockDeviceClient::new()))?;
    assert_eq!(state.start_all().await, 1);
    let server = TestServer::new(router(state.clone()))?;

    server
        .post("/cameras/Lobby/preview")
        .await
        .assert_status(StatusCode::CONFLICT);

    state.close_all().await;
    let response = server.post("/cameras/Lobby/preview").await;
    response.assert_status_ok();
    let summary: Value = response.json();
    assert_eq!(summary["preview"]["state"], "streaming");

    state.close_all().await;
    Ok(())
}

#[tokio::test]
async fn test_unavailable_preview_is_reported() -> Result<()> {
    let refused: SourceFactory = Arc::new(|| Box::new(Refused) as Box<dyn FrameSource>);
    let state = state_with_source(Arc::new(MockDeviceClient::new()), refused)?;
    // The camera itself still starts
    assert_eq!(state.start_all().await, 1);
    let server = TestServer::new(router(state.clone()))?;

    let response = server.post("/cameras/Lobby/preview").await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .contains("connection refused"));

    let cameras: Value = server.get("/cameras").await.json();
    assert_eq!(cameras[0]["started"], true);
    assert_eq!(cameras[0]["preview"]["state"], "failed");

    state.close_all().await;
    Ok(())
}

#[tokio::test]
async fn test_unstarted_camera_and_restart() -> Result<()> {
    let device = Arc::new(MockDeviceClient::new());
    device.fail_connect(Some(ControlError::Connection("no route to host".into())));
    let state = custom_state(device.clone())?;
    assert_eq!(state.start_all().await, 0);

    let server = TestServer::new(router(state.clone()))?;
    server
        .post("/cameras/Lobby/press")
        .json(&json!({"gesture": "up"}))
        .await
        .assert_status(StatusCode::CONFLICT);
    // Release stays harmless
    server.post("/cameras/Lobby/release").await.assert_status_ok();
    server
        .post("/cameras/Lobby/presets/1/goto")
        .await
        .assert_status(StatusCode::CONFLICT);

    let summary: Value = server.post("/cameras/Lobby/restart").await.json();
    assert_eq!(summary["started"], false);
    assert!(summary["status"]
        .as_str()
        .unwrap_or_default()
        .contains("Cannot connect to Lobby"));

    device.fail_connect(None);
    let summary: Value = server.post("/cameras/Lobby/restart").await.json();
    assert_eq!(summary["started"], true);
    assert_eq!(summary["status"], Value::Null);

    state.close_all().await;
    Ok(())
}
