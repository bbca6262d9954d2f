use anyhow::{Context, Result};
use control_panel::{routes, shutdown::shutdown_signal, AppState, Settings};
use std::net::SocketAddr;
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_structured_logging(
        LogConfig::new("control-panel").with_version(env!("CARGO_PKG_VERSION")),
    );

    let bind_addr: SocketAddr = std::env::var("CONTROL_PANEL_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8095".to_string())
        .parse()
        .context("invalid bind address")?;

    let settings = Settings::from_env().context("failed to load settings")?;
    info!(
        cameras = settings.cameras.len(),
        path = ?settings.path(),
        "settings loaded"
    );

    let state = AppState::from_settings(settings)?;

    // A camera that fails to start only reports it in its status
    state.start_all().await;

    let app = routes::router(state.clone());

    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "control-panel listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.close_all().await;
    Ok(())
}
