use axum::routing::get;
use axum::Router;
use clap::Parser;
use log::{info, warn};
use server::admission::Gate;
use server::board::PanelStore;
use server::config::Config;
use server::hub::Hub;
use server::{connection, snapshot, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;

/// Main-method of the application.
/// Parses configuration, restores the latest snapshot, then starts the
/// hub, the snapshot timer and the HTTP listener.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::parse();
    config.validate()?;

    // Ensure the data directory exists before restore or snapshotting.
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(PanelStore::new(config.panels, config.cols, config.rows)?);

    // On startup, load the latest snapshot if available.
    match snapshot::restore_latest(&store, &config.data_dir).await {
        Ok(Some(path)) => info!("restored canvas from {}", path.display()),
        Ok(None) => info!("no snapshot found, starting with an empty canvas"),
        Err(e) => warn!("snapshot restore skipped: {}", e),
    }

    let hub = Hub::spawn();

    tokio::spawn(snapshot::run(
        Arc::clone(&store),
        config.data_dir.clone(),
        config.snapshot_interval(),
    ));

    let gate = Gate::from_secret(config.admission_secret.clone());
    if let Gate::Open = &gate {
        warn!("admission gate disabled; every connection will be accepted");
    }

    let state = Arc::new(AppState {
        store,
        hub,
        gate,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/ws", get(connection::serve_ws))
        .fallback_service(ServeDir::new(&config.static_dir))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("server started on {}", config.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c, shutting down");
    })
    .await?;

    Ok(())
}
