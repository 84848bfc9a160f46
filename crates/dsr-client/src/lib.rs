//! Remote client for dsrpc.
//!
//! [`RemoteStore`] implements [`KvStore`](dsr_store::KvStore) by sending
//! protocol frames to a dsrpc server, so callers can swap a local store for
//! a remote one without code changes. Reply codes map back onto store
//! errors; transport failures surface as `BackendUnavailable`. [`Batch`]
//! buffers writes client-side and replays them on commit.

pub mod batch;
pub mod remote;

pub use batch::Batch;
pub use remote::RemoteStore;
