//! Wire protocol for dsrpc.
//!
//! Defines the request and reply messages exchanged between clients and the
//! server, the reply codes every store error is classified into, and the
//! framing used on the wire. Unary calls carry one frame each way; a query
//! reply body is a sequence of frames decoded incrementally with
//! [`FrameDecoder`].

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;

pub use codec::{DsCodec, FrameDecoder};
pub use endpoint::{endpoints, HealthResponse, InfoResponse, FRAME_CONTENT_TYPE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    CommonReply, CommonRequest, DsMessage, ErrCode, QueryReply, QueryRequest, MAX_MESSAGE_SIZE,
    PROTOCOL_VERSION,
};
