use std::sync::Arc;

use dsr_protocol::InfoResponse;
use tokio_util::sync::CancellationToken;

use crate::facade::KvService;

/// Shared application state, cloned into every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub service: KvService,
    pub info: Arc<InfoResponse>,
    /// Cancelled when the server shuts down; query streams hold child tokens.
    pub shutdown: CancellationToken,
    pub max_message_size: usize,
}
