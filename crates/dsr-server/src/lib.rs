//! HTTP server for dsrpc.
//!
//! Puts a [`KvStore`](dsr_store::KvStore) on the network. Unary calls take
//! one protocol frame and answer with one frame; queries answer with a
//! stream of frames produced as the store's entry stream is polled.
//! Every store error is classified into a reply code by the
//! [`KvService`] facade before it reaches the transport.

pub mod config;
pub mod error;
pub mod facade;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use config::{BackendConfig, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use facade::{classify, KvService, QueryReplyStream};
pub use server::{shutdown_signal, DsrServer};
pub use state::AppState;
