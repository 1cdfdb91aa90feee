use anyhow::Context;
use envconfig::Envconfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use decision_api::config::Config;
use decision_api::connectors::Connectors;

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to register SIGTERM handler")?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("failed to register SIGINT handler")?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
    Ok(())
}

fn init_logging(debug: bool) {
    let base_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    let log_layer = if debug {
        base_layer
            .with_ansi(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        base_layer
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("invalid configuration")?;
    init_logging(*config.debug);

    if *config.enable_metrics {
        PrometheusBuilder::new()
            .with_http_listener(config.metrics_address)
            .install()
            .context("failed to install prometheus exporter")?;
        info!(address = %config.metrics_address, "serving metrics");
    }

    let connectors = Connectors::from_config(&config)
        .await
        .context("failed to build connectors")?;

    connectors
        .init(config.env_id.as_str(), config.api_key.as_str())
        .await
        .context("failed to load environment")?;
    info!(env_id = config.env_id.as_str(), "decision runtime ready");

    shutdown_signal().await?;

    if let Err(e) = connectors.shutdown(config.shutdown_timeout.0).await {
        error!(error = %e, "hits were lost during shutdown");
    }
    info!("shutdown complete");
    Ok(())
}
