use std::future::Future;
use std::io;
use tracing::{info, warn};

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = listen("ctrl-c", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = listen("SIGTERM", async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())?.recv().await;
        Ok::<(), io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

/// Wait for `listener` to report its signal. A listener that cannot be
/// installed never resolves.
async fn listen<F>(name: &str, listener: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = listener.await {
        warn!(signal = name, error = %e, "cannot listen for signal");
        std::future::pending::<()>().await;
    }
}
