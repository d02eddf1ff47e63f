use anyhow::Context;

use starport_infra::StarportConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    starport_observability::init();

    let config = StarportConfig::from_env().context("invalid configuration")?;
    let services = starport_api::app::services::build_services(&config).context("failed to start settlement")?;
    let app = starport_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        settlement_workers = config.settlement_workers,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Let queued trades finish before exiting.
    tokio::task::spawn_blocking(move || services.shutdown()).await?;
    tracing::info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
