use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod config;
mod errors;
mod handlers;
mod storage;
mod upload;

use app::{AppState, Assets};
use config::{AppConfig, StorageKind};
use storage::{CloudinaryStorage, InMemoryStorage, LocalFileStorage, Storage, TimeoutStorage};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    let (storage, uploads) = build_storage(&config)?;

    let state = AppState::new(storage, config.upload_constraints());
    let assets = Assets {
        static_dir: Some(config.static_dir.clone()),
        index_page: config.index_page.clone(),
        index_aliases: config.index_aliases.clone(),
        uploads,
    };
    let app = app::router(state, &assets);

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Server running");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Picks the configured backend and, for local storage, the directory to serve.
fn build_storage(config: &AppConfig) -> Result<(Arc<dyn Storage>, Option<(String, PathBuf)>)> {
    let limit = config.backend_timeout;

    let built: (Arc<dyn Storage>, Option<(String, PathBuf)>) = match &config.storage {
        StorageKind::Memory => (
            Arc::new(TimeoutStorage::new(InMemoryStorage::new(&config.folder), limit)),
            None,
        ),
        StorageKind::Local { root, public_url } => {
            let local = LocalFileStorage::new(root.clone(), &config.folder, public_url.clone())
                .context("failed to initialize local storage")?;
            let served = (public_url.clone(), local.blob_dir().to_path_buf());
            (Arc::new(TimeoutStorage::new(local, limit)), Some(served))
        }
        StorageKind::Cloudinary(cloudinary) => {
            let hosted = CloudinaryStorage::new(cloudinary.clone())
                .context("failed to initialize cloudinary client")?;
            (Arc::new(TimeoutStorage::new(hosted, limit)), None)
        }
    };

    info!(storage = ?config.storage, folder = %config.folder, "storage backend ready");
    Ok(built)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
