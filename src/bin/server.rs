//! Relay server binary: upstream WebSocket client + viewer HTTP surface.
//!
//! Configuration comes entirely from the environment; a missing required
//! variable is the only fatal startup condition.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use lingolens::{Relay, RelayConfig, UpstreamClient, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_env().map_err(|e| {
        tracing::error!(error = %e, "startup configuration invalid");
        anyhow::anyhow!("startup failed: {e}")
    })?;
    tracing::info!(
        package = %config.package_name,
        port = config.port,
        production = config.production,
        "lingolens starting"
    );

    let upstream = Arc::new(UpstreamClient::new(&config));
    let source: Arc<dyn lingolens::TranslationSource> = Arc::clone(&upstream) as Arc<dyn lingolens::TranslationSource>;
    let sink: Arc<dyn lingolens::GlassesSink> = Arc::clone(&upstream) as Arc<dyn lingolens::GlassesSink>;
    let relay = Relay::new(config.clone(), source, sink);

    let cancel = CancellationToken::new();

    let upstream_task = {
        let relay = relay.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { upstream.run(relay, cancel).await })
    };

    let server_task = {
        let relay = relay.clone();
        let port = config.port;
        let cancel = cancel.clone();
        tokio::spawn(async move { server::serve(relay, port, cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    relay.shutdown().await;
    let _ = upstream_task.await;
    if let Err(err) = server_task.await? {
        tracing::error!("viewer surface exited with error: {err}");
    }

    tracing::info!("lingolens shut down cleanly");
    Ok(())
}
