use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use dsr_protocol::{
    CommonReply, CommonRequest, DsCodec, DsMessage, HealthResponse, InfoResponse, ProtocolError,
    FRAME_CONTENT_TYPE,
};
use futures::{Stream, StreamExt};
use tokio_util::sync::DropGuard;
use tracing::debug;

use crate::error::ServerResult;
use crate::facade::QueryReplyStream;
use crate::state::AppState;

/// Health check handler.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Info handler.
pub async fn info_handler(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(state.info.as_ref().clone())
}

pub async fn put_handler(State(state): State<AppState>, body: Bytes) -> ServerResult<Response> {
    let req = common_request(&body)?;
    reply(state.service.put(req).await)
}

pub async fn delete_handler(State(state): State<AppState>, body: Bytes) -> ServerResult<Response> {
    let req = common_request(&body)?;
    reply(state.service.delete(req).await)
}

pub async fn get_handler(State(state): State<AppState>, body: Bytes) -> ServerResult<Response> {
    let req = common_request(&body)?;
    reply(state.service.get(req).await)
}

pub async fn has_handler(State(state): State<AppState>, body: Bytes) -> ServerResult<Response> {
    let req = common_request(&body)?;
    reply(state.service.has(req).await)
}

pub async fn size_handler(State(state): State<AppState>, body: Bytes) -> ServerResult<Response> {
    let req = common_request(&body)?;
    reply(state.service.get_size(req).await)
}

/// Streaming query handler.
///
/// The response body owns a drop guard for the query's cancellation token:
/// when the client disconnects the body is dropped, the token fires and the
/// store stops advancing its cursor.
pub async fn query_handler(State(state): State<AppState>, body: Bytes) -> ServerResult<Response> {
    let req = DsCodec::decode_exact(&body)?.into_query_request()?;
    let cancel = state.shutdown.child_token();
    let replies = state.service.query(req, cancel.clone()).await;

    let frames = Guarded {
        inner: replies,
        _guard: cancel.drop_guard(),
    }
    .map(|reply| DsCodec::encode(&DsMessage::QueryReply(reply)).map(Bytes::from));

    Ok(([(CONTENT_TYPE, FRAME_CONTENT_TYPE)], Body::from_stream(frames)).into_response())
}

fn common_request(body: &[u8]) -> Result<CommonRequest, ProtocolError> {
    let req = DsCodec::decode_exact(body)?.into_common_request()?;
    debug!(key = %req.key, value_len = req.value.len(), "request decoded");
    Ok(req)
}

fn reply(reply: CommonReply) -> ServerResult<Response> {
    let frame = DsCodec::encode(&DsMessage::CommonReply(reply))?;
    Ok(([(CONTENT_TYPE, FRAME_CONTENT_TYPE)], frame).into_response())
}

/// Reply stream that cancels its query when dropped.
struct Guarded {
    inner: QueryReplyStream,
    _guard: DropGuard,
}

impl Stream for Guarded {
    type Item = dsr_protocol::QueryReply;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
