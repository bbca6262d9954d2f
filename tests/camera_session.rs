//! Camera session behaviour against the in-memory camera.

use anyhow::Result;
use control_panel::{CameraSession, CameraSettings, Gesture, SessionError, SpeedSettings, SpeedTier};
use device_control::{
    AxisRange, ControlError, DeviceCall, MockDeviceClient, MotionCommand, Preset, PtzDevice,
};
use preview::{FfmpegSource, FrameSource, PreviewConfig, PreviewPipeline, SourceFactory};
use std::sync::Arc;
use std::time::Duration;

fn camera(name: &str) -> CameraSettings {
    CameraSettings {
        name: name.to_string(),
        host: "mock".to_string(),
        port: 80,
        username: "admin".to_string(),
        password: "secret".to_string(),
        preview_url: String::new(),
        hidden_presets: vec![],
    }
}

fn session_with(settings: CameraSettings, device: Arc<MockDeviceClient>) -> CameraSession {
    let factory: SourceFactory = Arc::new(|| Box::new(FfmpegSource::new()) as Box<dyn FrameSource>);
    let preview = PreviewPipeline::new(&settings.name, PreviewConfig::default(), factory);
    CameraSession::new(&settings, SpeedSettings::default(), device, preview)
}

#[tokio::test]
async fn test_failed_camera_does_not_stop_others() -> Result<()> {
    telemetry::init();

    let broken = Arc::new(MockDeviceClient::new());
    broken.fail_connect(Some(ControlError::Connection("timed out".into())));
    let healthy = Arc::new(MockDeviceClient::new());

    let sessions = [
        session_with(camera("broken"), broken.clone()),
        session_with(camera("healthy"), healthy.clone()),
    ];
    let results = start_both(&sessions).await;

    assert_eq!(results, vec![false, true]);
    assert!(sessions[0].status().unwrap_or_default().contains("Cannot connect to broken"));
    assert!(sessions[1].status().is_none());
    Ok(())
}

async fn start_both(sessions: &[CameraSession]) -> Vec<bool> {
    let (a, b) = tokio::join!(sessions[0].start(), sessions[1].start());
    vec![a, b]
}

#[tokio::test]
async fn test_stop_reaches_device_after_failed_move() -> Result<()> {
    let device = Arc::new(MockDeviceClient::new());
    let session = session_with(camera("cam"), device.clone());
    assert!(session.start().await);
    device.clear_calls();
    device.fail_motion(true);

    let pressed = session.press(Gesture::Up, SpeedTier::Fast).await;
    assert!(matches!(
        pressed,
        Err(SessionError::Control(ControlError::Command(_)))
    ));
    session.release().await?;

    let calls = device.calls();
    assert_eq!(calls.last(), Some(&DeviceCall::Stop));
    assert!(session.is_started(), "a failed command keeps the session usable");

    device.fail_motion(false);
    session.press(Gesture::ZoomIn, SpeedTier::Slow).await?;
    assert!(session.status().is_none());
    Ok(())
}

#[tokio::test]
async fn test_reconnect_after_auth_error_repopulates_capabilities() -> Result<()> {
    let narrow = AxisRange::new(-0.5, 0.5)?;
    let device = Arc::new(MockDeviceClient::with_bounds(narrow, narrow, AxisRange::NOMINAL));
    let session = session_with(camera("cam"), device.clone());
    assert!(session.start().await);
    assert!(session.capabilities().is_some());

    device.fail_connect(Some(ControlError::Auth("password changed".into())));
    assert!(!session.restart().await);
    assert!(session.capabilities().is_none());
    assert!(!session.is_started());

    device.fail_connect(None);
    assert!(session.restart().await);
    let caps = session.capabilities().ok_or_else(|| anyhow::anyhow!("no capabilities"))?;
    assert_eq!(caps.pan, narrow);
    assert_eq!(caps.tilt, narrow);
    assert_eq!(caps.zoom, AxisRange::NOMINAL);
    assert!(session.status().is_none());
    Ok(())
}

#[tokio::test]
async fn test_release_lands_after_slow_press() -> Result<()> {
    let device = Arc::new(MockDeviceClient::new());
    let session = Arc::new(session_with(camera("cam"), device.clone()));
    assert!(session.start().await);
    device.clear_calls();
    device.set_latency(Some(Duration::from_millis(30)));

    let pressing = {
        let session = session.clone();
        tokio::spawn(async move { session.press(Gesture::Right, SpeedTier::Fast).await })
    };
    // Let the press take the command lock first
    tokio::time::sleep(Duration::from_millis(5)).await;
    session.release().await?;
    pressing.await??;

    let calls = device.calls();
    assert!(matches!(calls[0], DeviceCall::Move { .. }));
    assert_eq!(calls[1], DeviceCall::Stop);
    Ok(())
}

#[tokio::test]
async fn test_preset_round_trip() -> Result<()> {
    let device = Arc::new(MockDeviceClient::new().with_presets(vec![Preset::new("1", "Home")]));
    let session = session_with(camera("cam"), device.clone());
    assert!(session.start().await);

    let token = session.save_preset("Pulpit", None).await?;
    let presets = session.presets().await;
    assert_eq!(presets.len(), 2);
    assert_eq!(presets[1], Preset::new(token.clone(), "Pulpit"));

    let same = session.save_preset("Lectern", Some(&token)).await?;
    assert_eq!(same, token);
    let presets = session.presets().await;
    assert_eq!(presets[1], Preset::new(token.clone(), "Lectern"));

    session.goto_preset_index(1).await?;
    assert_eq!(device.calls().last(), Some(&DeviceCall::PresetGoto(token.clone())));

    let hidden = session.set_preset_hidden(&token, true).await?;
    assert_eq!(hidden, vec!["Lectern".to_string()]);

    session.remove_preset(&token).await?;
    assert_eq!(session.presets().await, vec![Preset::new("1", "Home")]);
    assert!(session.hidden_preset_names().await.is_empty());

    assert!(matches!(
        session.save_preset("Ghost", Some("99")).await,
        Err(SessionError::Control(ControlError::PresetNotFound(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_hidden_presets_from_settings() -> Result<()> {
    let device = Arc::new(MockDeviceClient::new().with_presets(vec![
        Preset::new("1", "Home"),
        Preset::new("2", "Spare"),
    ]));
    let mut settings = camera("cam");
    settings.hidden_presets = vec!["Spare".to_string()];
    let session = session_with(settings, device);
    assert!(session.start().await);

    let presets = session.presets().await;
    assert!(!presets[0].hidden);
    assert!(presets[1].hidden);
    Ok(())
}

#[tokio::test]
async fn test_nudge_moves_then_stops() -> Result<()> {
    let device = MockDeviceClient::new();
    device
        .connect(&camera("cam").endpoint())
        .await?;

    device
        .nudge(
            &MotionCommand::Move { pan: 0.0, tilt: 0.5 },
            Duration::from_millis(10),
        )
        .await?;

    let calls = device.calls();
    assert_eq!(
        &calls[1..],
        &[DeviceCall::Move { pan: 0.0, tilt: 0.5 }, DeviceCall::Stop]
    );
    Ok(())
}
