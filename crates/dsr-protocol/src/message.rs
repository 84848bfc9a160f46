use dsr_types::Entry;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Outcome classification carried by every reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrCode {
    #[default]
    None = 0,
    NotFound = 1,
    Other = 2,
}

impl ErrCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Unknown codes classify as `Other`.
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::NotFound,
            _ => Self::Other,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::None
    }
}

/// Request shared by the unary calls. `value` is only read by `put`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonRequest {
    pub key: String,
    pub value: Vec<u8>,
}

impl CommonRequest {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
        }
    }

    pub fn with_value(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Reply shared by the unary calls. Only the field relevant to the call is
/// populated: `value` for get, `success` for has, `size` for get-size.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonReply {
    pub code: ErrCode,
    pub msg: String,
    pub value: Vec<u8>,
    pub success: bool,
    pub size: u64,
}

impl CommonReply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(code: ErrCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: Vec<u8>) -> Self {
        self.value = value;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

/// Query call request. `q` is a JSON-encoded `QuerySpec`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub q: Vec<u8>,
}

/// One frame of a query reply stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReply {
    pub code: ErrCode,
    pub msg: String,
    pub entry: Option<Entry>,
}

impl QueryReply {
    pub fn entry(entry: Entry) -> Self {
        Self {
            entry: Some(entry),
            ..Self::default()
        }
    }

    pub fn error(code: ErrCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            entry: None,
        }
    }
}

/// All message types in the dsrpc protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DsMessage {
    CommonRequest(CommonRequest),
    CommonReply(CommonReply),
    QueryRequest(QueryRequest),
    QueryReply(QueryReply),
}

impl DsMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::CommonRequest(_) => 1,
            Self::CommonReply(_) => 2,
            Self::QueryRequest(_) => 3,
            Self::QueryReply(_) => 4,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CommonRequest(_) => "CommonRequest",
            Self::CommonReply(_) => "CommonReply",
            Self::QueryRequest(_) => "QueryRequest",
            Self::QueryReply(_) => "QueryReply",
        }
    }

    /// Returns `true` if `tag` names a known message type.
    pub fn is_known_tag(tag: u8) -> bool {
        (1..=4).contains(&tag)
    }

    pub fn into_common_request(self) -> ProtocolResult<CommonRequest> {
        match self {
            Self::CommonRequest(req) => Ok(req),
            other => Err(other.unexpected("CommonRequest")),
        }
    }

    pub fn into_common_reply(self) -> ProtocolResult<CommonReply> {
        match self {
            Self::CommonReply(reply) => Ok(reply),
            other => Err(other.unexpected("CommonReply")),
        }
    }

    pub fn into_query_request(self) -> ProtocolResult<QueryRequest> {
        match self {
            Self::QueryRequest(req) => Ok(req),
            other => Err(other.unexpected("QueryRequest")),
        }
    }

    pub fn into_query_reply(self) -> ProtocolResult<QueryReply> {
        match self {
            Self::QueryReply(reply) => Ok(reply),
            other => Err(other.unexpected("QueryReply")),
        }
    }

    fn unexpected(&self, expected: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedMessage {
            expected,
            actual: self.type_name(),
        }
    }
}

impl From<CommonRequest> for DsMessage {
    fn from(req: CommonRequest) -> Self {
        Self::CommonRequest(req)
    }
}

impl From<CommonReply> for DsMessage {
    fn from(reply: CommonReply) -> Self {
        Self::CommonReply(reply)
    }
}

impl From<QueryRequest> for DsMessage {
    fn from(req: QueryRequest) -> Self {
        Self::QueryRequest(req)
    }
}

impl From<QueryReply> for DsMessage {
    fn from(reply: QueryReply) -> Self {
        Self::QueryReply(reply)
    }
}
