use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::sync::Arc;

use filebridge::config::Config;
use filebridge::server::{print_startup_banner, IngestServer};
use filebridge::state::AppState;
use filebridge::utils::shutdown_signal;

// use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        // a missing directory is not fatal, each upload retries creating it
        if let Err(e) = std::fs::create_dir_all(&config.save_dir) {
            tracing::warn!("Failed to create save directory {:?}: {}", config.save_dir, e);
        }

        let state = Arc::new(AppState::from_config(&config));
        let server = IngestServer::new(state.clone());

        let status = match server.start().await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("❌ {}", e);
                std::process::exit(1);
            }
        };
        print_startup_banner(&status, state.save_dir().as_deref());

        let compression = state.compression_settings();
        if compression.enabled {
            tracing::info!(
                "🖼️  Image compression on (quality {}, keep original: {})",
                compression.quality,
                compression.keep_original
            );
        }

        shutdown_signal().await;

        if let Err(e) = server.stop().await {
            tracing::warn!("Stop failed: {}", e);
        }
    });
}
