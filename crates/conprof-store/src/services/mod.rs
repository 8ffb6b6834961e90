//! Profile Store gRPC service
//!
//! Serves `conprof.store.ProfileStore` (Write, Profile, Series) and the
//! write-only `conprof.store.WritableProfileStore` over any storage engine
//! implementing [`Db`]. The service keeps no state between calls; every call
//! opens its own transaction or querier and releases it before returning.

pub mod frames;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use conprof_proto::storepb::{
    profile_store_server::ProfileStore, writable_profile_store_server::WritableProfileStore,
    LabelMatcher, ProfileRequest, ProfileResponse, SeriesRequest, SeriesResponse, WriteRequest,
    WriteResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::runutil::{close_with_err_capture, CloseOnDrop};
use crate::storage::{ChunkQuerier, Db, Matcher, Querier, Transaction};
use crate::translate::{labels_from_pb, matchers_from_pb};

pub use frames::{stream_series, FrameSink};

/// Frames buffered between the series producer task and the transport.
const SERIES_CHANNEL_CAPACITY: usize = 16;

fn translate_matchers(ms: &[LabelMatcher]) -> Result<Vec<Matcher>, Status> {
    matchers_from_pb(ms)
        .map_err(|e| Status::invalid_argument(format!("could not translate matchers: {}", e)))
}

/// Frames of one `Series` call. Dropping the stream cancels the task
/// producing them, which then releases its querier.
#[derive(Debug)]
pub struct SeriesFrames {
    inner: ReceiverStream<Result<SeriesResponse, Status>>,
    _cancel: DropGuard,
}

impl Stream for SeriesFrames {
    type Item = Result<SeriesResponse, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[derive(Clone)]
pub struct ProfileStoreService {
    db: Arc<dyn Db>,
    max_bytes_per_frame: usize,
}

impl ProfileStoreService {
    pub fn new(db: Arc<dyn Db>, max_bytes_per_frame: usize) -> Self {
        Self {
            db,
            max_bytes_per_frame,
        }
    }

    /// Applies every sample of `req` in one transaction and commits it once.
    ///
    /// The first failing add aborts the call; the transaction is then rolled
    /// back when its guard drops, so nothing of the request is stored.
    pub async fn write_profiles(
        &self,
        req: WriteRequest,
        cancel: CancellationToken,
    ) -> Result<(), Status> {
        let mut txn = Transaction::new(self.db.appender(cancel));
        for series in req.profile_series {
            let labels = labels_from_pb(&series.labels)?;
            for sample in series.samples {
                txn.add(labels.clone(), sample.timestamp, sample.value)?;
            }
        }

        let samples = txn.samples();
        txn.commit().await?;
        debug!(samples, "Write committed");
        Ok(())
    }

    /// Payload of the first sample at or after `req.timestamp` in the first
    /// series matching `req.matchers`. Further matching series are ignored.
    ///
    /// A failure to close the querier fails an otherwise successful lookup.
    pub fn lookup_profile(&self, req: &ProfileRequest) -> Result<Bytes, Status> {
        let mut querier = self
            .db
            .querier(req.timestamp, req.timestamp)
            .map_err(|e| Status::internal(e.to_string()))?;

        let mut res = Self::first_profile(querier.as_ref(), req);
        close_with_err_capture(&mut res, &mut querier, "close tsdb querier profile");
        res
    }

    fn first_profile(querier: &dyn Querier, req: &ProfileRequest) -> Result<Bytes, Status> {
        let matchers = translate_matchers(&req.matchers)?;

        let mut set = querier.select(&matchers);
        let mut series = match set.next() {
            Some(Ok(series)) => series,
            Some(Err(e)) => return Err(Status::internal(e.to_string())),
            None => return Err(Status::not_found("profile series not found")),
        };
        let sample = series
            .samples
            .seek(req.timestamp)
            .ok_or_else(|| Status::not_found("profile not found"))?;
        Ok(sample.value)
    }

    /// Starts a `Series` query. Validation and querier errors are returned
    /// directly; everything after that is reported through the stream.
    pub fn open_series(&self, req: SeriesRequest) -> Result<SeriesFrames, Status> {
        let matchers = translate_matchers(&req.matchers)?;
        let cancel = CancellationToken::new();
        let querier = self
            .db
            .chunk_querier(cancel.clone(), req.min_time, req.max_time)
            .map_err(|e| Status::internal(e.to_string()))?;
        let querier = CloseOnDrop::new(querier, "close tsdb chunk querier series");

        let (mut tx, rx) = mpsc::channel(SERIES_CHANNEL_CAPACITY);
        let max_bytes_per_frame = self.max_bytes_per_frame;
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut set = querier.select(&matchers);
            let res = stream_series(set.as_mut(), max_bytes_per_frame, &mut tx, &task_cancel).await;
            match res {
                Ok(()) => {}
                Err(_) if task_cancel.is_cancelled() => {
                    debug!("Series stream dropped by caller");
                }
                Err(status) => {
                    warn!(code = ?status.code(), error = %status.message(), "Series stream failed");
                    // The receiver is gone when the failure was a send error.
                    let _ = tx.send(Err(status)).await;
                }
            }
            drop(set);
            drop(querier);
        });

        Ok(SeriesFrames {
            inner: ReceiverStream::new(rx),
            _cancel: cancel.drop_guard(),
        })
    }
}

#[tonic::async_trait]
impl ProfileStore for ProfileStoreService {
    type SeriesStream = SeriesFrames;

    #[tracing::instrument(skip(self, request), fields(series = request.get_ref().profile_series.len()))]
    async fn write(
        &self,
        request: Request<WriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        // Dropping the handler future (client gone) cancels the transaction.
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        self.write_profiles(request.into_inner(), cancel).await?;
        Ok(Response::new(WriteResponse {}))
    }

    #[tracing::instrument(skip(self, request), fields(timestamp = request.get_ref().timestamp, matchers = request.get_ref().matchers.len()))]
    async fn profile(
        &self,
        request: Request<ProfileRequest>,
    ) -> Result<Response<ProfileResponse>, Status> {
        let data = self.lookup_profile(request.get_ref())?;
        Ok(Response::new(ProfileResponse { data }))
    }

    #[tracing::instrument(skip(self, request), fields(min_time = request.get_ref().min_time, max_time = request.get_ref().max_time, matchers = request.get_ref().matchers.len()))]
    async fn series(
        &self,
        request: Request<SeriesRequest>,
    ) -> Result<Response<Self::SeriesStream>, Status> {
        let stream = self.open_series(request.into_inner())?;
        Ok(Response::new(stream))
    }
}

#[tonic::async_trait]
impl WritableProfileStore for ProfileStoreService {
    async fn write(
        &self,
        request: Request<WriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        ProfileStore::write(self, request).await
    }
}
