use std::pin::Pin;
use std::sync::Arc;

use dsr_protocol::{CommonReply, CommonRequest, ErrCode, QueryReply, QueryRequest};
use dsr_store::{KvStore, StoreError};
use dsr_types::QuerySpec;
use futures::{stream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Stream of query reply frames. Ends after the first error frame.
pub type QueryReplyStream = Pin<Box<dyn Stream<Item = QueryReply> + Send>>;

/// Map a store error onto the reply code sent to clients.
pub fn classify(err: &StoreError) -> ErrCode {
    match err {
        StoreError::NotFound { .. } => ErrCode::NotFound,
        _ => ErrCode::Other,
    }
}

fn failure(op: &'static str, key: &str, err: StoreError) -> CommonReply {
    let code = classify(&err);
    if code == ErrCode::Other {
        warn!(op, key = %key, error = %err, "store call failed");
    }
    CommonReply::error(code, err.to_string())
}

/// Translates protocol requests into store calls and store results into
/// protocol replies. Never fails: every error becomes a reply code.
#[derive(Clone)]
pub struct KvService {
    store: Arc<dyn KvStore>,
}

impl KvService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub async fn put(&self, req: CommonRequest) -> CommonReply {
        match self.store.put(&req.key, &req.value).await {
            Ok(()) => CommonReply::ok(),
            Err(err) => failure("put", &req.key, err),
        }
    }

    pub async fn delete(&self, req: CommonRequest) -> CommonReply {
        match self.store.delete(&req.key).await {
            Ok(existed) => CommonReply::ok().with_success(existed),
            Err(err) => failure("delete", &req.key, err),
        }
    }

    pub async fn get(&self, req: CommonRequest) -> CommonReply {
        match self.store.get(&req.key).await {
            Ok(value) => CommonReply::ok().with_size(value.len() as u64).with_value(value),
            Err(err) => failure("get", &req.key, err),
        }
    }

    pub async fn has(&self, req: CommonRequest) -> CommonReply {
        match self.store.has(&req.key).await {
            Ok(found) => CommonReply::ok().with_success(found),
            Err(err) => failure("has", &req.key, err),
        }
    }

    pub async fn get_size(&self, req: CommonRequest) -> CommonReply {
        match self.store.get_size(&req.key).await {
            Ok(size) => CommonReply::ok().with_size(size),
            Err(err) => failure("get_size", &req.key, err),
        }
    }

    /// Run a query and stream one reply per entry.
    ///
    /// A malformed spec, or a store that refuses the query, produces a
    /// single error frame. A store error mid-stream is sent as the last
    /// frame.
    pub async fn query(&self, req: QueryRequest, cancel: CancellationToken) -> QueryReplyStream {
        let spec = match QuerySpec::from_json(&req.q) {
            Ok(spec) => spec,
            Err(err) => {
                debug!(error = %err, "rejecting malformed query");
                return single(QueryReply::error(ErrCode::Other, StoreError::from(err).to_string()));
            }
        };

        match self.store.query(spec, cancel).await {
            Ok(entries) => Box::pin(entries.map(|result| match result {
                Ok(entry) => QueryReply::entry(entry),
                Err(err) => {
                    warn!(error = %err, "query stream failed");
                    QueryReply::error(classify(&err), err.to_string())
                }
            })),
            Err(err) => {
                warn!(error = %err, "query rejected");
                single(QueryReply::error(classify(&err), err.to_string()))
            }
        }
    }
}

fn single(reply: QueryReply) -> QueryReplyStream {
    Box::pin(stream::once(async move { reply }))
}

#[cfg(test)]
mod tests {
    use dsr_backend::MemoryBackend;
    use dsr_store::{open_store, StoreConfig};
    use dsr_types::Entry;

    use super::*;

    fn service() -> KvService {
        let store = open_store(Arc::new(MemoryBackend::new()), &StoreConfig::default());
        KvService::new(store)
    }

    fn query(json: &str) -> QueryRequest {
        QueryRequest { q: json.as_bytes().to_vec() }
    }

    #[test]
    fn classifies_errors() {
        assert_eq!(classify(&StoreError::not_found("k")), ErrCode::NotFound);
        assert_eq!(classify(&StoreError::Internal("x".into())), ErrCode::Other);
        assert_eq!(classify(&StoreError::InvalidArgument("x".into())), ErrCode::Other);
        assert_eq!(classify(&StoreError::BackendUnavailable("x".into())), ErrCode::Other);
    }

    #[tokio::test]
    async fn unary_calls_map_results() {
        let svc = service();
        assert!(svc.put(CommonRequest::with_value("k", b"hello".to_vec())).await.code.is_ok());

        let got = svc.get(CommonRequest::key("k")).await;
        assert_eq!(got.code, ErrCode::None);
        assert_eq!(got.value, b"hello".to_vec());

        assert!(svc.has(CommonRequest::key("k")).await.success);
        assert_eq!(svc.get_size(CommonRequest::key("k")).await.size, 5);

        let missing = svc.get(CommonRequest::key("missing")).await;
        assert_eq!(missing.code, ErrCode::NotFound);
        assert!(!missing.msg.is_empty());

        let has_missing = svc.has(CommonRequest::key("missing")).await;
        assert_eq!(has_missing.code, ErrCode::None);
        assert!(!has_missing.success);

        assert_eq!(svc.get_size(CommonRequest::key("missing")).await.code, ErrCode::NotFound);
    }

    #[tokio::test]
    async fn delete_absent_is_success() {
        let svc = service();
        let reply = svc.delete(CommonRequest::key("nothing")).await;
        assert_eq!(reply.code, ErrCode::None);
        assert!(!reply.success);
    }

    #[tokio::test]
    async fn query_streams_entries() {
        let svc = service();
        for key in ["a/1", "a/2", "b/1"] {
            svc.put(CommonRequest::with_value(key, key.as_bytes().to_vec())).await;
        }
        let replies: Vec<QueryReply> = svc
            .query(query(r#"{"Prefix":"a/"}"#), CancellationToken::new())
            .await
            .collect()
            .await;
        assert_eq!(replies, vec![
            QueryReply::entry(Entry::with_value("a/1", b"a/1".to_vec())),
            QueryReply::entry(Entry::with_value("a/2", b"a/2".to_vec())),
        ]);
    }

    #[tokio::test]
    async fn malformed_query_is_single_error_frame() {
        let svc = service();
        let replies: Vec<QueryReply> =
            svc.query(query("{not json"), CancellationToken::new()).await.collect().await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, ErrCode::Other);
        assert!(replies[0].entry.is_none());

        let replies: Vec<QueryReply> = svc
            .query(query(r#"{"Filters":[{"op":"eq"}]}"#), CancellationToken::new())
            .await
            .collect()
            .await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, ErrCode::Other);
    }
}
