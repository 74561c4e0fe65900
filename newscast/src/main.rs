use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use newscast::broadcast::{ChannelManager, SupervisorDeps, SupervisorSettings};
use newscast::config::AppConfig;
use newscast::control::ControlWatcher;
use newscast::database::{self, SqliteItemStore};
use newscast::encoder::{Encoder, FfmpegEncoder, FfmpegEncoderConfig, ProcessSettings};
use newscast::logging;
use newscast::render::{AssetGenerator, FfmpegCardRenderer, StaticAssetGenerator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration decides where logs go, so it is loaded first.
    let config = AppConfig::from_env().context("loading configuration")?;
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;

    let cancel = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel.clone());

    info!("newscast {} starting", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    // Initialize database
    let pool = database::init_pool(&config.database_url)
        .await
        .context("opening database")?;
    database::run_migrations(&pool).await?;
    let store = Arc::new(SqliteItemStore::new(pool));
    store.ensure_default_channel().await?;

    // Encoder and renderer share the ffmpeg binary
    let encoder = FfmpegEncoder::with_config(FfmpegEncoderConfig {
        binary_path: config.ffmpeg_path.clone(),
        process: ProcessSettings {
            kill_grace: config.kill_grace,
            ..ProcessSettings::default()
        },
        ..FfmpegEncoderConfig::default()
    });
    if !encoder.is_available() {
        warn!(
            "ffmpeg not found at '{}'; segments will fail until it is installed",
            config.ffmpeg_path
        );
    }

    let generator: Arc<dyn AssetGenerator> = if config.prerendered_frames {
        info!("Using pre-rendered frames");
        Arc::new(StaticAssetGenerator::new())
    } else {
        let mut renderer = FfmpegCardRenderer::new(&config.ffmpeg_path, &config.data_dir)
            .with_size(config.frame_width, config.frame_height)
            .with_frame_sink(store.clone());
        if let Some(font) = encoder.config().profile.ticker_font.clone()
            && font.exists()
        {
            renderer = renderer.with_font(font);
        }
        Arc::new(renderer)
    };

    let deps = SupervisorDeps {
        store: store.clone(),
        generator,
        encoder: Arc::new(encoder),
    };
    let manager = Arc::new(ChannelManager::new(
        deps,
        SupervisorSettings::from_app_config(&config),
        config.channel_defaults.clone(),
    ));

    for channel in store.list_channels().await? {
        manager.update_config(channel.id, channel.overrides());
        info!(channel_id = channel.id, name = %channel.name, "Channel registered");

        if config.autostart
            && let Err(e) = manager.start(channel.id).await
        {
            error!(channel_id = channel.id, "Autostart failed: {}", e);
        }
    }

    let watcher =
        ControlWatcher::new(manager.clone(), &config.data_dir).with_logging(logging_config.clone());
    let watcher_task = tokio::spawn(watcher.run(cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown requested");

    let report = manager.shutdown(config.shutdown_timeout).await;
    cancel.cancel();
    let _ = watcher_task.await;

    if !report.all_graceful() {
        warn!(
            "{} channel(s) had to be force-stopped",
            report.forced_terminations
        );
    }
    info!("newscast stopped");
    Ok(())
}
