pub mod auth;
pub mod cleanup;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod types;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use auth::Authenticator;
pub use cleanup::{start_cleanup_service, CleanupConfig};
pub use error::{ApiError, ApiResult, AppError};
pub use state::AppState;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 7432,
        }
    }
}

/// Server handle for managing the running server
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            tracing::error!("API server task failed: {}", e);
        }
    }
}

/// Start the API server
pub async fn start_server(state: AppState, config: ApiConfig) -> anyhow::Result<ServerHandle> {
    let router = routes::create_router(state);

    let addr = SocketAddr::new(config.host, config.port);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("API server listening on http://{}", actual_addr);

    let join = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                tracing::info!("API server shutting down");
            })
            .await;
        if let Err(e) = result {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr: actual_addr,
        shutdown_tx,
        join,
    })
}
