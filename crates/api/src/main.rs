use anyhow::Context;

use jobboard_api::app::{self, services};
use jobboard_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    jobboard_observability::init(config.log_format);

    let hosted: Vec<&str> = config.services.iter().map(|s| s.as_str()).collect();
    tracing::info!(services = ?hosted, bind_addr = %config.bind_addr, "starting");

    let backends = services::connect_backends(&config).await?;
    let runtime = services::start(&config, backends)
        .await
        .context("failed to start consumer workers")?;

    let router = app::build_app(runtime.services());
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    runtime.shutdown().await;
    tracing::info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
