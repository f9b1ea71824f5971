use copurchase_api::{
    api::{create_router, AppState},
    config::Config,
    services::loader,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let state = AppState::from_config(&config);

    // Seeding runs alongside the server; /health reports initializing until done
    match config.seed_file.clone() {
        Some(path) => {
            let seed_state = state.clone();
            let incremental_updates = config.incremental_updates;
            tokio::spawn(async move {
                match loader::load_seed_file(&seed_state.manager, &path, incremental_updates).await {
                    Ok(report) => tracing::info!(
                        accepted = report.accepted,
                        rejected = report.rejected,
                        "Seed load finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Seed load failed, starting empty"),
                }
                seed_state.mark_ready();
            });
        }
        None => state.mark_ready(),
    }

    let app = create_router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
