use std::{net::SocketAddr, sync::Arc};

use arena_agent::{
    config::AgentConfig,
    docker::DockerRuntime,
    http::{self, AppState},
    manager::LifecycleManager,
    registry::InstanceRegistry,
};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env();
    let addr = SocketAddr::new(config.bind_addr, config.listen_port);

    let runtime = DockerRuntime::connect()?;
    if let Err(e) = runtime.ping().await {
        tracing::warn!(error = %e, "docker daemon not reachable; launches will fail until it is");
    }

    tracing::info!(
        max_instances = config.max_instances,
        image = %config.image,
        vnc_base_port = config.vnc_base_port,
        "arena-agent starting"
    );

    let manager = LifecycleManager::new(InstanceRegistry::new(), Arc::new(runtime), config);
    let app = http::router(AppState {
        manager: manager.clone(),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "arena-agent HTTP listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    tracing::info!("arena-agent stopped");
    Ok(())
}
