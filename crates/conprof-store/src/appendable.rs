//! Forwarding Appender
//!
//! A producer that does not own a store forwards its profiles to one over
//! gRPC. [`GrpcAppendable`] exposes the storage engine's write-transaction
//! capability, but each transaction relays its sample through a single remote
//! `Write` call on commit instead of writing locally.
//!
//! ## Single-Sample Contract
//!
//! A [`GrpcAppender`] buffers **at most one** sample. The producer path this
//! serves commits every scraped profile in its own transaction, so one sample
//! per transaction is the supported contract:
//!
//! ```text
//! add(labelsA, t1, v1)   pending = A
//! add(labelsB, t2, v2)   pending = B   (A is dropped, logged at WARN)
//! commit()               Write{ [labelsB: (t2, v2)] }
//! ```
//!
//! Callers that need batching must open one transaction per sample or write
//! through the `WritableProfileStore` client directly.
//!
//! ## Cancellation
//!
//! Every transaction is bound to the `CancellationToken` it was opened with.
//! A commit still in flight when the token fires fails with
//! [`Error::Cancelled`].

use async_trait::async_trait;
use bytes::Bytes;
use conprof_proto::storepb::{
    writable_profile_store_client::WritableProfileStoreClient, ProfileSeries, Sample,
    WriteRequest, WriteResponse,
};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::storage::{Appendable, Appender, Labels, SeriesRef};
use crate::translate::labels_to_pb;

/// The remote `Write` call a forwarding appender depends on.
#[async_trait]
pub trait RemoteWriter: Clone + Send + Sync + 'static {
    async fn write(&self, request: WriteRequest) -> std::result::Result<WriteResponse, Status>;
}

#[async_trait]
impl RemoteWriter for WritableProfileStoreClient<Channel> {
    async fn write(&self, request: WriteRequest) -> std::result::Result<WriteResponse, Status> {
        let mut client = self.clone();
        WritableProfileStoreClient::write(&mut client, request)
            .await
            .map(|resp| resp.into_inner())
    }
}

/// Opens forwarding transactions against a remote store.
#[derive(Clone)]
pub struct GrpcAppendable<W> {
    client: W,
}

impl<W: RemoteWriter> GrpcAppendable<W> {
    pub fn new(client: W) -> Self {
        Self { client }
    }
}

impl GrpcAppendable<WritableProfileStoreClient<Channel>> {
    /// Connects to the store at `addr` (e.g. `http://store:10902`).
    pub async fn connect(addr: impl Into<String>) -> Result<Self> {
        let channel = Endpoint::from_shared(addr.into())?.connect().await?;
        Ok(Self::new(WritableProfileStoreClient::new(channel)))
    }
}

impl<W: RemoteWriter> Appendable for GrpcAppendable<W> {
    fn appender(&self, cancel: CancellationToken) -> Box<dyn Appender> {
        Box::new(GrpcAppender {
            client: self.client.clone(),
            cancel,
            pending: None,
        })
    }
}

struct PendingSample {
    labels: Labels,
    timestamp: i64,
    value: Bytes,
}

/// One forwarding transaction. See the module docs for the single-sample
/// contract.
pub struct GrpcAppender<W> {
    client: W,
    cancel: CancellationToken,
    pending: Option<PendingSample>,
}

impl<W> GrpcAppender<W> {
    fn write_request(pending: Option<PendingSample>) -> WriteRequest {
        // Committing without a prior add still sends one, empty, series.
        let (labels, sample) = match pending {
            Some(p) => (
                labels_to_pb(&p.labels),
                Sample {
                    timestamp: p.timestamp,
                    value: p.value,
                },
            ),
            None => (Vec::new(), Sample::default()),
        };
        WriteRequest {
            profile_series: vec![ProfileSeries {
                labels,
                samples: vec![sample],
            }],
        }
    }
}

#[async_trait]
impl<W: RemoteWriter> Appender for GrpcAppender<W> {
    fn add(&mut self, labels: Labels, timestamp: i64, value: Bytes) -> Result<SeriesRef> {
        let next = PendingSample {
            labels,
            timestamp,
            value,
        };
        if let Some(prev) = self.pending.replace(next) {
            warn!(
                labels = %prev.labels,
                timestamp = prev.timestamp,
                "Forwarding appender holds one sample per transaction, replacing pending sample"
            );
        }
        Ok(0)
    }

    fn add_fast(&mut self, _series: SeriesRef, _timestamp: i64, _value: Bytes) -> Result<()> {
        Err(Error::Unimplemented("add_fast on forwarding appender"))
    }

    async fn commit(&mut self) -> Result<()> {
        let request = Self::write_request(self.pending.take());

        debug!("Sending write request");
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            resp = self.client.write(request) => resp.map(|_| ()).map_err(Error::from),
        };
        if let Err(e) = &result {
            error!(error = %e, "Failed to send profile");
        }
        result
    }

    fn rollback(&mut self) -> Result<()> {
        self.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct MockWriter {
        requests: Arc<Mutex<Vec<WriteRequest>>>,
        fail_with: Option<Status>,
        hang: bool,
    }

    #[async_trait]
    impl RemoteWriter for MockWriter {
        async fn write(&self, request: WriteRequest) -> std::result::Result<WriteResponse, Status> {
            self.requests.lock().await.push(request);
            if self.hang {
                std::future::pending::<()>().await;
            }
            match &self.fail_with {
                Some(status) => Err(status.clone()),
                None => Ok(WriteResponse {}),
            }
        }
    }

    fn labels(job: &str) -> Labels {
        Labels::from_pairs([("job", job)]).unwrap()
    }

    #[tokio::test]
    async fn test_last_add_wins() {
        let writer = MockWriter::default();
        let appendable = GrpcAppendable::new(writer.clone());
        let mut app = appendable.appender(CancellationToken::new());

        app.add(labels("a"), 1, Bytes::from_static(b"v1")).unwrap();
        app.add(labels("b"), 2, Bytes::from_static(b"v2")).unwrap();
        app.commit().await.unwrap();

        let requests = writer.requests.lock().await;
        assert_eq!(requests.len(), 1);
        let series = &requests[0].profile_series;
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].labels[0].value, "b");
        assert_eq!(series[0].samples.len(), 1);
        assert_eq!(series[0].samples[0].timestamp, 2);
        assert_eq!(series[0].samples[0].value, Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn test_commit_without_add_sends_empty_write() {
        let writer = MockWriter::default();
        let mut app = GrpcAppendable::new(writer.clone()).appender(CancellationToken::new());
        app.commit().await.unwrap();

        let requests = writer.requests.lock().await;
        let series = &requests[0].profile_series[0];
        assert!(series.labels.is_empty());
        assert_eq!(series.samples[0], Sample::default());
    }

    #[tokio::test]
    async fn test_remote_error_returned_verbatim() {
        let writer = MockWriter {
            fail_with: Some(Status::resource_exhausted("slow down")),
            ..Default::default()
        };
        let mut app = GrpcAppendable::new(writer).appender(CancellationToken::new());
        app.add(labels("a"), 1, Bytes::new()).unwrap();

        let status = Status::from(app.commit().await.unwrap_err());
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);
        assert_eq!(status.message(), "slow down");
    }

    #[tokio::test]
    async fn test_add_fast_unimplemented() {
        let mut app = GrpcAppendable::new(MockWriter::default()).appender(CancellationToken::new());
        let err = app.add_fast(0, 1, Bytes::new()).unwrap_err();
        assert!(matches!(err, Error::Unimplemented(_)));
    }

    #[tokio::test]
    async fn test_rollback_sends_nothing() {
        let writer = MockWriter::default();
        let mut app = GrpcAppendable::new(writer.clone()).appender(CancellationToken::new());
        app.add(labels("a"), 1, Bytes::new()).unwrap();
        app.rollback().unwrap();
        assert!(writer.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_transactions_are_independent() {
        let writer = MockWriter::default();
        let appendable = GrpcAppendable::new(writer.clone());
        let mut first = appendable.appender(CancellationToken::new());
        let mut second = appendable.appender(CancellationToken::new());

        first.add(labels("a"), 1, Bytes::new()).unwrap();
        second.commit().await.unwrap();
        first.commit().await.unwrap();

        let requests = writer.requests.lock().await;
        assert!(requests[0].profile_series[0].labels.is_empty());
        assert_eq!(requests[1].profile_series[0].labels[0].value, "a");
    }

    #[tokio::test]
    async fn test_cancelled_commit() {
        let writer = MockWriter {
            hang: true,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let mut app = GrpcAppendable::new(writer).appender(cancel.clone());
        app.add(labels("a"), 1, Bytes::new()).unwrap();

        cancel.cancel();
        assert!(matches!(app.commit().await.unwrap_err(), Error::Cancelled));
    }
}
