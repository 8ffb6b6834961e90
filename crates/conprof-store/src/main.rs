//! Conprof Profile Store Server
//!
//! Serves `conprof.store.ProfileStore` and `conprof.store.WritableProfileStore`
//! over gRPC, backed by the in-memory storage engine.
//!
//! ## Configuration
//! All configuration is done via environment variables:
//! - `CONPROF_STORE_ADDR`: Server bind address (default: 0.0.0.0:10902)
//! - `CONPROF_MAX_BYTES_PER_FRAME`: Byte budget of one Series frame (default: 1048576)
//! - `CONPROF_SAMPLES_PER_CHUNK`: Samples per stored chunk (default: 120)
//!
//! ## Logging
//! Logging is controlled via the `RUST_LOG` environment variable:
//! ```bash
//! RUST_LOG=debug cargo run -p conprof-store    # Detailed logs
//! RUST_LOG=info cargo run -p conprof-store     # Standard logs (default)
//! ```

use std::sync::Arc;

use conprof_proto::storepb::{
    profile_store_server::ProfileStoreServer,
    writable_profile_store_server::WritableProfileStoreServer,
};
use conprof_store::{MemoryDb, ProfileStoreService, StoreConfig};
use tonic::transport::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = StoreConfig::from_env()?;

    let db = Arc::new(MemoryDb::new(config.samples_per_chunk));
    let service = ProfileStoreService::new(db, config.max_bytes_per_frame);

    tracing::info!(
        addr = %config.listen_addr,
        max_bytes_per_frame = config.max_bytes_per_frame,
        samples_per_chunk = config.samples_per_chunk,
        "Profile store starting"
    );

    Server::builder()
        .add_service(ProfileStoreServer::new(service.clone()))
        .add_service(WritableProfileStoreServer::new(service))
        .serve_with_shutdown(config.listen_addr, shutdown_signal())
        .await?;

    tracing::info!("Profile store stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
