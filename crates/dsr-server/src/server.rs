use std::sync::Arc;

use dsr_backend::Backend;
use dsr_protocol::{InfoResponse, PROTOCOL_VERSION};
use dsr_store::{open_store, KvStore, StoreMode};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::facade::KvService;
use crate::router::build_router;
use crate::state::AppState;

/// dsrpc key-value server.
pub struct DsrServer {
    config: ServerConfig,
    store: Arc<dyn KvStore>,
    state: AppState,
}

impl DsrServer {
    /// Open the configured backend and store.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let backend = config.backend.open()?;
        let kind = backend.kind();
        let store = open_store(backend, &config.store);
        Ok(Self::with_store(config, store, kind))
    }

    /// Serve an existing store. `backend` names the engine in the info
    /// endpoint.
    pub fn with_store(config: ServerConfig, store: Arc<dyn KvStore>, backend: &str) -> Self {
        let info = InfoResponse {
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: PROTOCOL_VERSION,
            store_mode: match config.store.mode {
                StoreMode::Dedup => "dedup".into(),
                StoreMode::PassThrough => "pass_through".into(),
            },
            backend: backend.to_string(),
            digest: config.store.digest.to_string(),
        };
        let state = AppState {
            service: KvService::new(Arc::clone(&store)),
            info: Arc::new(info),
            shutdown: CancellationToken::new(),
            max_message_size: config.max_message_size,
        };
        Self { config, store, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Token that stops the server when cancelled. In-flight query
    /// streams are cancelled with it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already-bound listener until the shutdown token fires,
    /// then close the store.
    pub async fn serve_with_listener(self, listener: TcpListener) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        let app = self.router();
        let shutdown = self.state.shutdown.clone();
        info!(
            addr = %addr,
            backend = %self.state.info.backend,
            mode = %self.state.info.store_mode,
            "dsr server listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        info!("dsr server stopped; closing store");
        if let Err(err) = self.store.close().await {
            warn!(error = %err, "store close failed");
            return Err(err.into());
        }
        Ok(())
    }
}

/// Resolve when the process receives Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
