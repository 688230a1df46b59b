use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `token` on SIGTERM (Kubernetes pod termination) or ctrl-c.
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        () = shutdown_signal() => info!("shutdown signal received"),
        () = token.cancelled() => return,
    }
    token.cancel();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to listen for SIGTERM, falling back to ctrl-c");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        () = ctrl_c() => info!("ctrl-c received"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
