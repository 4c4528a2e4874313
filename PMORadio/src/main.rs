use anyhow::Context;
use pmobroadcast::{FfmpegEncoder, RadioExt, Station, StationConfigExt};
use pmoconfig::get_config;
use pmometadata::DirectoryScanner;
use pmoserver::{LoggingOptions, Server};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config();

    // ========== PHASE 1 : Serveur et logs ==========
    let mut server = Server::new_configured();
    server
        .init_logging(LoggingOptions::from_config(&config))
        .await;

    server
        .add_route("/info", || async {
            serde_json::json!({"name": "PMORadio", "version": env!("CARGO_PKG_VERSION")})
        })
        .await;

    // ========== PHASE 2 : Station ==========
    let settings = config
        .station_settings()
        .context("Invalid station configuration")?;
    info!(
        "📻 Opening station {} on {}",
        settings.name,
        settings.music_dir.display()
    );

    let encoder = Arc::new(FfmpegEncoder::new(settings.encoder.clone()));
    let (station, broadcaster) =
        Station::open(settings, Arc::new(DirectoryScanner::new()), encoder)
            .await
            .context("Failed to scan the music directory")?;

    if station.playlist().is_empty() {
        warn!("⚠️ No playable track found, the station stays idle until a reload");
    }

    // la diffusion s'arrête avec le serveur
    let shutdown = server.shutdown_token();
    let broadcast_task = broadcaster.spawn(shutdown.child_token());

    server.init_radio(station.clone()).await?;
    server.add_redirect("/", "/swagger-ui/radio").await;

    // ========== PHASE 3 : Démarrage ==========
    info!("🌐 Starting HTTP server...");
    server.start().await?;

    let info = server.info();
    info!(
        "✅ PMORadio is ready: http://{}:{}/api/radio/stream",
        info.base_url, info.http_port
    );
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    // le serveur annule le jeton en s'arrêtant
    shutdown.cancel();
    let grace = station.settings().shutdown_timeout + Duration::from_secs(1);
    match tokio::time::timeout(grace, broadcast_task).await {
        Ok(Ok(())) => info!("👋 PMORadio stopped"),
        Ok(Err(e)) => warn!("Broadcaster task failed: {}", e),
        Err(_) => warn!("Broadcaster did not stop within {:?}", grace),
    }

    Ok(())
}
