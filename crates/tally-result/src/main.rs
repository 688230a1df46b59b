use std::net::SocketAddr;

use clap::Parser;
use tally::{Establisher, Hub};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tally_result::config::Args;
use tally_result::server::{self, AppState};
use tally_result::{pipeline, shutdown};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_result=info,tally=info".into()),
        )
        .json()
        .init();

    let settings = match Args::parse().resolve() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        backend = settings.backend.name(),
        port = settings.port,
        max_attempts = settings.retry.max_attempts,
        "tally-result starting"
    );

    let hub = Hub::new();
    let shutdown = CancellationToken::new();
    let establisher = Establisher::new(settings.retry);
    let link = establisher.state();

    let pipeline = match pipeline::spawn(&settings, establisher, hub.clone(), shutdown.clone()) {
        Ok(task) => task,
        Err(e) => {
            error!(backend = settings.backend.name(), error = %e, "failed to build backend");
            return Err(e.into());
        }
    };

    let state = AppState {
        hub,
        link,
        backend: settings.backend.name(),
        views_dir: settings.views_dir.clone(),
        shutdown: shutdown.clone(),
    };
    let app = server::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "App running on port {}", settings.port);

    tokio::spawn(shutdown::cancel_on_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    if let Ok(Some(stats)) = pipeline.await {
        info!(
            ticks = stats.ticks,
            published = stats.published,
            failures = stats.failures,
            "poller finished"
        );
    }

    info!("tally-result stopped");
    Ok(())
}
