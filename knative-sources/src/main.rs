use anyhow::Context;
use knative_sources::config::ControllerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("knative_sources=info")),
        )
        .init();

    let config = ControllerConfig::from_env();
    info!(controller = %config.controller_name, "starting");

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    knative_sources::controller::run(client, config)
        .await
        .context("controller failed")?;

    info!("shut down");
    Ok(())
}
