use common::TelemetryGuard;
use gateway::{AppState, GatewayConfig, logging::setup_logging, routes::router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();

    let _telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init("gateway", endpoint))
        .transpose()?;

    setup_logging(&config);

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    let state = AppState::build(&config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
