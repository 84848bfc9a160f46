use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use dsr_protocol::{
    endpoints, CommonReply, CommonRequest, DsCodec, DsMessage, ErrCode, FrameDecoder,
    HealthResponse, InfoResponse, ProtocolError, QueryRequest, FRAME_CONTENT_TYPE,
};
use dsr_store::{EntryStream, KvStore, StoreError, StoreResult};
use dsr_types::{Entry, QuerySpec};
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Key-value store served by a remote dsrpc server.
#[derive(Clone, Debug)]
pub struct RemoteStore {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteStore {
    /// Client for the server at `base_url`, e.g. `http://127.0.0.1:1516`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> StoreResult<HealthResponse> {
        self.get_json(endpoints::HEALTH).await
    }

    pub async fn info(&self) -> StoreResult<InfoResponse> {
        self.get_json(endpoints::INFO).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> StoreResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(StoreError::Internal(format!("{path}: HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| StoreError::Internal(format!("{path}: {e}")))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(&self, path: &str, msg: DsMessage) -> StoreResult<reqwest::Response> {
        let body = DsCodec::encode(&msg).map_err(protocol)?;
        let response = self
            .http
            .post(self.url(path))
            .header(CONTENT_TYPE, FRAME_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Internal(format!("{path}: HTTP {status}: {text}")));
        }
        Ok(response)
    }

    async fn call(&self, path: &str, req: CommonRequest) -> StoreResult<CommonReply> {
        let key = req.key.clone();
        let response = self.post(path, req.into()).await?;
        let body = response.bytes().await.map_err(unavailable)?;
        let reply = DsCodec::decode_exact(&body)
            .and_then(DsMessage::into_common_reply)
            .map_err(protocol)?;
        debug!(path, key = %key, code = ?reply.code, "call complete");
        Ok(reply)
    }
}

fn unavailable(err: reqwest::Error) -> StoreError {
    StoreError::BackendUnavailable(err.to_string())
}

fn protocol(err: ProtocolError) -> StoreError {
    StoreError::Internal(err.to_string())
}

/// Turn a non-`None` reply code back into a store error.
fn reply_error(code: ErrCode, msg: String, key: &str) -> StoreError {
    match code {
        ErrCode::NotFound => StoreError::not_found(key),
        _ => StoreError::Internal(msg),
    }
}

#[async_trait]
impl KvStore for RemoteStore {
    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let reply = self
            .call(endpoints::PUT, CommonRequest::with_value(key, value.to_vec()))
            .await?;
        match reply.code {
            ErrCode::None => Ok(()),
            code => Err(reply_error(code, reply.msg, key)),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let reply = self.call(endpoints::GET, CommonRequest::key(key)).await?;
        match reply.code {
            ErrCode::None => Ok(reply.value),
            code => Err(reply_error(code, reply.msg, key)),
        }
    }

    async fn has(&self, key: &str) -> StoreResult<bool> {
        let reply = self.call(endpoints::HAS, CommonRequest::key(key)).await?;
        match reply.code {
            ErrCode::None => Ok(reply.success),
            ErrCode::NotFound => Ok(false),
            code => Err(reply_error(code, reply.msg, key)),
        }
    }

    async fn get_size(&self, key: &str) -> StoreResult<u64> {
        let reply = self.call(endpoints::SIZE, CommonRequest::key(key)).await?;
        match reply.code {
            ErrCode::None => Ok(reply.size),
            code => Err(reply_error(code, reply.msg, key)),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let reply = self.call(endpoints::DELETE, CommonRequest::key(key)).await?;
        match reply.code {
            ErrCode::None => Ok(reply.success),
            ErrCode::NotFound => Ok(false),
            code => Err(reply_error(code, reply.msg, key)),
        }
    }

    async fn query(&self, spec: QuerySpec, cancel: CancellationToken) -> StoreResult<EntryStream> {
        spec.validate()?;
        let req = QueryRequest { q: spec.to_json()? };
        let response = self.post(endpoints::QUERY, req.into()).await?;

        let state = ReplyReader {
            body: Box::pin(response.bytes_stream()),
            decoder: FrameDecoder::new(),
            cancel,
            done: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, |mut state| async move {
            let item = state.next_entry().await?;
            Some((item, state))
        })))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Decodes query reply frames from a streaming response body.
struct ReplyReader {
    body: ByteStream,
    decoder: FrameDecoder,
    cancel: CancellationToken,
    done: bool,
}

impl ReplyReader {
    async fn next_entry(&mut self) -> Option<StoreResult<Entry>> {
        loop {
            if self.done || self.cancel.is_cancelled() {
                return None;
            }

            match self.decoder.next_frame() {
                Ok(Some(msg)) => {
                    let reply = match msg.into_query_reply() {
                        Ok(reply) => reply,
                        Err(err) => return self.fail(protocol(err)),
                    };
                    if reply.code != ErrCode::None {
                        let err = match reply.code {
                            ErrCode::NotFound => StoreError::not_found(reply.msg),
                            _ => StoreError::Internal(reply.msg),
                        };
                        return self.fail(err);
                    }
                    match reply.entry {
                        Some(entry) => return Some(Ok(entry)),
                        None => continue,
                    }
                }
                Ok(None) => {}
                Err(err) => return self.fail(protocol(err)),
            }

            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                chunk = self.body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => self.decoder.extend(&bytes),
                Some(Err(err)) => return self.fail(unavailable(err)),
                None if self.decoder.is_empty() => return None,
                None => {
                    let buffered = self.decoder.buffered();
                    return self.fail(StoreError::Internal(format!(
                        "query stream ended inside a frame ({buffered} bytes buffered)"
                    )));
                }
            }
        }
    }

    fn fail(&mut self, err: StoreError) -> Option<StoreResult<Entry>> {
        warn!(error = %err, "remote query failed");
        self.done = true;
        Some(Err(err))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dsr_backend::MemoryBackend;
    use dsr_server::{DsrServer, ServerConfig};
    use dsr_store::{DedupStore, StoreConfig};
    use tokio::net::TcpListener;

    use super::*;

    struct Running {
        client: RemoteStore,
        local: DedupStore,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<dsr_server::ServerResult<()>>,
    }

    impl Running {
        async fn stop(self) {
            self.shutdown.cancel();
            self.handle.await.unwrap().unwrap();
        }
    }

    async fn start() -> Running {
        let local = DedupStore::new(Arc::new(MemoryBackend::new()), &StoreConfig::default());
        let server = DsrServer::with_store(ServerConfig::default(), Arc::new(local.clone()), "memory");
        let shutdown = server.shutdown_token();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(server.serve_with_listener(listener));
        Running {
            client: RemoteStore::new(format!("http://{addr}/")),
            local,
            shutdown,
            handle,
        }
    }

    #[tokio::test]
    async fn shared_block_scenario_over_the_wire() {
        let running = start().await;
        let (client, local) = (&running.client, &running.local);
        let hash = local.hash_of(b"hello");

        client.put("x", b"hello").await.unwrap();
        client.put("y", b"hello").await.unwrap();
        assert_eq!(local.block(&hash).await.unwrap().unwrap().ref_count, 2);
        assert_eq!(client.get_size("x").await.unwrap(), 5);

        client.delete("x").await.unwrap();
        assert_eq!(local.block(&hash).await.unwrap().unwrap().ref_count, 1);
        assert_eq!(client.get("y").await.unwrap(), b"hello".to_vec());

        assert!(client.delete("y").await.unwrap());
        assert!(local.block(&hash).await.unwrap().is_none());
        assert!(client.get("y").await.unwrap_err().is_not_found());
        assert!(client.get_size("y").await.unwrap_err().is_not_found());
        assert!(!client.has("y").await.unwrap());
        assert!(!client.delete("y").await.unwrap());

        running.stop().await;
    }

    #[tokio::test]
    async fn remote_query_streams_in_order() {
        let running = start().await;
        let client = &running.client;
        for key in ["a/3", "b/1", "a/1", "a/2"] {
            client.put(key, key.as_bytes()).await.unwrap();
        }

        let entries: Vec<Entry> = client
            .query(QuerySpec::with_prefix("a/").limit(2), CancellationToken::new())
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(entries, vec![
            Entry::with_value("a/1", b"a/1".to_vec()),
            Entry::with_value("a/2", b"a/2".to_vec()),
        ]);

        let keys_only: Vec<Entry> = client
            .query(QuerySpec::default().keys_only(), CancellationToken::new())
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(keys_only.len(), 4);
        assert!(keys_only.iter().all(|e| e.value.is_none() && e.size == 3));

        running.stop().await;
    }

    #[tokio::test]
    async fn remote_query_cancel_stops_stream() {
        let running = start().await;
        let client = &running.client;
        for i in 0..5 {
            client.put(&format!("k{i}"), b"v").await.unwrap();
        }

        let token = CancellationToken::new();
        let mut stream = client.query(QuerySpec::default(), token.clone()).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        token.cancel();
        assert!(stream.next().await.is_none());
        drop(stream);

        running.stop().await;
    }

    #[tokio::test]
    async fn invalid_query_is_rejected_locally() {
        let running = start().await;
        let spec = QuerySpec {
            orders: Some(vec![serde_json::json!({"field": "key"})]),
            ..QuerySpec::default()
        };
        assert!(matches!(
            running.client.query(spec, CancellationToken::new()).await,
            Err(StoreError::InvalidArgument(_))
        ));
        running.stop().await;
    }

    #[tokio::test]
    async fn health_and_info() {
        let running = start().await;
        assert_eq!(running.client.health().await.unwrap().status, "ok");
        let info = running.client.info().await.unwrap();
        assert_eq!(info.store_mode, "dedup");
        running.stop().await;
    }

    #[tokio::test]
    async fn unreachable_server_is_backend_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RemoteStore::new(format!("http://{addr}"));
        assert!(matches!(client.get("k").await, Err(StoreError::BackendUnavailable(_))));
    }
}
