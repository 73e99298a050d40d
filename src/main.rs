//! browse-drive server binary.
//!
//! Exposes one directory tree over HTTP for a browser-based file manager:
//! listing, streaming and downloading files, multipart uploads, folder
//! creation and recursive deletion, all confined to the storage root.

mod config;
mod content;
mod error;
mod etag;
mod files;
mod http;
mod logging;
mod routes;
mod staging;
mod storage;
#[cfg(test)]
mod test_support;
mod upload;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::config::{Args, GRACEFUL_SHUTDOWN_SECS, load_env_file, normalize_mount_prefix};
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let env_file = load_env_file();
    let args = Args::parse();
    logging::init_logging(&args.log_level);
    env_file.log();

    let storage = Arc::new(Storage::open(args.storage_dir.clone()).await?);
    let upload_config = Arc::new(UploadConfig {
        max_part_size: args.upload_max_part_size,
        max_form_size: args.upload_max_form_size,
    });
    let mount_prefix = normalize_mount_prefix(&args.mount_prefix);
    let app = routes::build_router(storage.clone(), upload_config, &mount_prefix);

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(root = %storage.root_path().display(), "serving storage root");
    info!("🚀 Starting HTTP server at {}{}/", addr, mount_prefix);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(GRACEFUL_SHUTDOWN_SECS)));
}
