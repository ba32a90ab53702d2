use std::sync::Arc;

use hearth_agent::{
    AppState, docker::DockerLauncher, resources::TomlStore, settings::AgentSettings,
};
use hearth_console::{ConsoleConfig, ConsoleHub, ResourceStore};

/// Re-attaches consoles for resources persisted as running. A resource that
/// cannot be attached is marked stopped.
async fn reattach_running(hub: &ConsoleHub, store: &TomlStore) {
    for id in store.running_ids().await {
        match hub.attach(id).await {
            Ok(_) => tracing::info!(resource = %id, "re-attached console"),
            Err(error) => {
                tracing::warn!(resource = %id, %error, "re-attach failed, marking stopped");
                if let Err(error) = store.set_running(id, false).await {
                    tracing::warn!(resource = %id, %error, "failed to persist stopped state");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = AgentSettings::from_env();
    let config = ConsoleConfig::from_env();
    tracing::debug!(?settings, ?config, "configuration loaded");

    let store = Arc::new(TomlStore::load(&settings.resources).await?);
    let launcher = Arc::new(DockerLauncher::new(
        settings.docker.clone(),
        settings.container_prefix.clone(),
    ));
    let hub = ConsoleHub::new(launcher, store.clone(), config)?;

    reattach_running(&hub, &store).await;

    let app = hearth_agent::app(AppState { hub });
    let listener = tokio::net::TcpListener::bind(&settings.listen).await?;
    tracing::info!(addr = %settings.listen, "hearth-agent listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
