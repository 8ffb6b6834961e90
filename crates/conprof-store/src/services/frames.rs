//! Series response framing.
//!
//! Chunks of one series are packed into [`SeriesResponse`] frames under a
//! per-frame byte budget. The budget of a series is
//! `max_bytes_per_frame - sum(encoded label sizes)`; every appended chunk is
//! charged its encoded size, and the frame is flushed once the budget is used
//! up or the series has no further chunk.
//!
//! The flush decision is taken *after* a chunk has been appended, so a frame
//! can overshoot the budget by at most one chunk:
//!
//! ```text
//! budget 80, chunks of 50
//!   +c1  remaining  30  next chunk follows -> keep filling
//!   +c2  remaining -20                     -> flush [c1, c2]
//!   +c3  remaining  30  last chunk         -> flush [c3]
//! ```
//!
//! A series whose labels alone exceed the frame size gets a non-positive
//! budget and degenerates to one chunk per frame.
//!
//! Streaming stops with `Cancelled` as soon as the call's token fires; the
//! token is checked before every series and every chunk.

use std::fmt::Display;

use conprof_proto::storepb::{RawProfileSeries, SeriesResponse};
use prost::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::debug;

use crate::storage::{ChunkSeries, ChunkSeriesSet};
use crate::translate::{chunk_to_pb, labels_to_pb};

/// Outbound half of a `Series` stream.
#[tonic::async_trait]
pub trait FrameSink: Send {
    type Error: Display + Send;

    async fn send(&mut self, frame: SeriesResponse) -> Result<(), Self::Error>;
}

#[tonic::async_trait]
impl FrameSink for mpsc::Sender<Result<SeriesResponse, Status>> {
    type Error = mpsc::error::SendError<Result<SeriesResponse, Status>>;

    async fn send(&mut self, frame: SeriesResponse) -> Result<(), Self::Error> {
        mpsc::Sender::send(self, Ok(frame)).await
    }
}

fn aborted(e: impl Display) -> Status {
    Status::aborted(e.to_string())
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), Status> {
    if cancel.is_cancelled() {
        return Err(Status::cancelled("series request cancelled"));
    }
    Ok(())
}

/// Streams every series of `set` into `sink`, followed by one frame per
/// warning the set collected.
///
/// Stops at the first failure: a failed send is `Aborted`, an engine error is
/// `Internal`. Frames already sent stay valid.
pub async fn stream_series<S: FrameSink>(
    set: &mut dyn ChunkSeriesSet,
    max_bytes_per_frame: usize,
    sink: &mut S,
    cancel: &CancellationToken,
) -> Result<(), Status> {
    let mut series_count = 0usize;
    loop {
        check_cancelled(cancel)?;
        let Some(item) = set.next() else {
            break;
        };
        let series = item.map_err(|e| Status::internal(e.to_string()))?;
        send_series(series, max_bytes_per_frame, sink, cancel).await?;
        series_count += 1;
        // Series without chunks never await on the sink.
        tokio::task::yield_now().await;
    }

    let warnings = set.warnings();
    debug!(
        series = series_count,
        warnings = warnings.len(),
        "Series set exhausted"
    );
    for warning in warnings {
        sink.send(SeriesResponse::warning(warning))
            .await
            .map_err(aborted)?;
    }
    Ok(())
}

async fn send_series<S: FrameSink>(
    series: ChunkSeries,
    max_bytes_per_frame: usize,
    sink: &mut S,
    cancel: &CancellationToken,
) -> Result<(), Status> {
    let labels = labels_to_pb(&series.labels);
    let label_bytes: usize = labels.iter().map(|l| l.encoded_len()).sum();
    let budget = max_bytes_per_frame as i64 - label_bytes as i64;

    let mut remaining = budget;
    let mut batch = Vec::new();
    let mut chunks = series.chunks.peekable();
    while let Some(item) = chunks.next() {
        check_cancelled(cancel)?;
        let meta = item.map_err(|e| Status::internal(format!("chunk iter: {}", e)))?;
        let chunk = chunk_to_pb(&meta).map_err(Status::from)?;
        remaining -= chunk.encoded_len() as i64;
        batch.push(chunk);

        let more = matches!(chunks.peek(), Some(Ok(_)));
        if remaining > 0 && more {
            continue;
        }

        let frame = SeriesResponse::series(RawProfileSeries {
            labels: labels.clone(),
            chunks: std::mem::take(&mut batch),
        });
        sink.send(frame).await.map_err(aborted)?;
        remaining = budget;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::storage::{Chunk, ChunkMeta, Encoding, Labels};
    use bytes::Bytes;
    use conprof_proto::storepb;

    /// Sink that records frames and can be told to fail from the n-th send.
    #[derive(Default)]
    struct RecordingSink {
        frames: Vec<SeriesResponse>,
        fail_from: Option<usize>,
    }

    #[tonic::async_trait]
    impl FrameSink for RecordingSink {
        type Error = String;

        async fn send(&mut self, frame: SeriesResponse) -> std::result::Result<(), String> {
            if self.fail_from.is_some_and(|n| self.frames.len() >= n) {
                return Err("connection reset".to_string());
            }
            self.frames.push(frame);
            Ok(())
        }
    }

    enum Scripted {
        Chunk(i64),
        Unpopulated(u64),
        Fail,
    }

    struct ScriptedSet {
        series: std::vec::IntoIter<Result<ChunkSeries>>,
        warnings: Vec<String>,
    }

    impl Iterator for ScriptedSet {
        type Item = Result<ChunkSeries>;

        fn next(&mut self) -> Option<Self::Item> {
            self.series.next()
        }
    }

    impl ChunkSeriesSet for ScriptedSet {
        fn warnings(&self) -> Vec<String> {
            self.warnings.clone()
        }
    }

    fn meta(t: i64) -> ChunkMeta {
        ChunkMeta {
            reference: t as u64,
            min_time: t,
            max_time: t + 9,
            chunk: Some(Chunk {
                encoding: Encoding::Bytes,
                data: Bytes::from(vec![0xAB; 32]),
            }),
        }
    }

    fn series(job: &str, script: Vec<Scripted>) -> Result<ChunkSeries> {
        let chunks: Vec<Result<ChunkMeta>> = script
            .into_iter()
            .map(|s| match s {
                Scripted::Chunk(t) => Ok(meta(t)),
                Scripted::Unpopulated(r) => Ok(ChunkMeta {
                    reference: r,
                    min_time: 0,
                    max_time: 0,
                    chunk: None,
                }),
                Scripted::Fail => Err(Error::Internal("corrupt index".to_string())),
            })
            .collect();
        Ok(ChunkSeries {
            labels: Labels::from_pairs([("job", job)]).unwrap(),
            chunks: Box::new(chunks.into_iter()),
        })
    }

    fn set(series: Vec<Result<ChunkSeries>>, warnings: &[&str]) -> ScriptedSet {
        ScriptedSet {
            series: series.into_iter(),
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
        }
    }

    fn chunk_size() -> usize {
        chunk_to_pb(&meta(0)).unwrap().encoded_len()
    }

    fn label_size(job: &str) -> usize {
        labels_to_pb(&Labels::from_pairs([("job", job)]).unwrap())
            .iter()
            .map(|l| l.encoded_len())
            .sum()
    }

    fn chunk_counts(frames: &[SeriesResponse]) -> Vec<usize> {
        frames
            .iter()
            .filter_map(|f| f.as_series())
            .map(|s| s.chunks.len())
            .collect()
    }

    #[tokio::test]
    async fn test_flushes_after_budget_is_exceeded() {
        let c = chunk_size();
        // Budget of one and a half chunks: the second chunk overshoots it.
        let max = label_size("api") + c + c / 2;
        let mut set = set(
            vec![series(
                "api",
                vec![Scripted::Chunk(0), Scripted::Chunk(10), Scripted::Chunk(20)],
            )],
            &[],
        );
        let mut sink = RecordingSink::default();

        stream_series(&mut set, max, &mut sink, &CancellationToken::new()).await.unwrap();

        assert_eq!(chunk_counts(&sink.frames), vec![2, 1]);
        let frames: Vec<&storepb::RawProfileSeries> =
            sink.frames.iter().filter_map(|f| f.as_series()).collect();
        assert_eq!(frames[0].chunks[0].min_time, 0);
        assert_eq!(frames[0].chunks[1].min_time, 10);
        assert_eq!(frames[1].chunks[0].min_time, 20);
        // Continuation frames repeat the series labels.
        assert_eq!(frames[0].labels, frames[1].labels);
    }

    #[tokio::test]
    async fn test_small_series_fits_one_frame() {
        let mut set = set(
            vec![series(
                "api",
                vec![Scripted::Chunk(0), Scripted::Chunk(10), Scripted::Chunk(20)],
            )],
            &[],
        );
        let mut sink = RecordingSink::default();
        stream_series(&mut set, 1024 * 1024, &mut sink, &CancellationToken::new()).await.unwrap();
        assert_eq!(chunk_counts(&sink.frames), vec![3]);
    }

    #[tokio::test]
    async fn test_oversized_labels_send_one_chunk_per_frame() {
        let mut set = set(
            vec![series("api", vec![Scripted::Chunk(0), Scripted::Chunk(10)])],
            &[],
        );
        let mut sink = RecordingSink::default();
        stream_series(&mut set, 1, &mut sink, &CancellationToken::new()).await.unwrap();
        assert_eq!(chunk_counts(&sink.frames), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_series_order_kept_and_warnings_last() {
        let mut set = set(
            vec![
                series("b", vec![Scripted::Chunk(0)]),
                series("a", vec![Scripted::Chunk(0)]),
                series("c", vec![]),
            ],
            &["partial result: block 3 unavailable", "slow query"],
        );
        let mut sink = RecordingSink::default();
        stream_series(&mut set, 1024, &mut sink, &CancellationToken::new()).await.unwrap();

        // An empty series produces no frame.
        assert_eq!(sink.frames.len(), 4);
        assert_eq!(sink.frames[0].as_series().unwrap().labels[0].value, "b");
        assert_eq!(sink.frames[1].as_series().unwrap().labels[0].value, "a");
        assert_eq!(
            sink.frames[2].as_warning(),
            Some("partial result: block 3 unavailable")
        );
        assert_eq!(sink.frames[3].as_warning(), Some("slow query"));
    }

    #[tokio::test]
    async fn test_chunk_iterator_error_after_flush() {
        let mut set = set(
            vec![series("api", vec![Scripted::Chunk(0), Scripted::Fail])],
            &["never sent"],
        );
        let mut sink = RecordingSink::default();
        let status = stream_series(&mut set, 1024 * 1024, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(status.message().contains("chunk iter"));
        // The chunk before the failure is flushed; no warning follows.
        assert_eq!(chunk_counts(&sink.frames), vec![1]);
        assert_eq!(sink.frames.len(), 1);
    }

    #[tokio::test]
    async fn test_unpopulated_chunk_is_internal() {
        let mut set = set(
            vec![series("api", vec![Scripted::Unpopulated(42)])],
            &[],
        );
        let mut sink = RecordingSink::default();
        let status = stream_series(&mut set, 1024, &mut sink, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(status.message().contains("not populated"));
        assert!(status.message().contains("42"));
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn test_series_set_error_is_internal() {
        let mut set = set(
            vec![
                series("api", vec![Scripted::Chunk(0)]),
                Err(Error::Internal("block read failed".to_string())),
            ],
            &["dropped"],
        );
        let mut sink = RecordingSink::default();
        let status = stream_series(&mut set, 1024, &mut sink, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(status.message(), "block read failed");
        assert_eq!(sink.frames.len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_aborts() {
        let mut set = set(
            vec![
                series("a", vec![Scripted::Chunk(0)]),
                series("b", vec![Scripted::Chunk(0)]),
            ],
            &["late"],
        );
        let mut sink = RecordingSink {
            fail_from: Some(1),
            ..Default::default()
        };
        let status = stream_series(&mut set, 1024, &mut sink, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Aborted);
        assert_eq!(sink.frames.len(), 1);
    }

    #[tokio::test]
    async fn test_warning_send_failure_aborts() {
        let mut set = set(vec![], &["w1", "w2"]);
        let mut sink = RecordingSink {
            fail_from: Some(1),
            ..Default::default()
        };
        let status = stream_series(&mut set, 1024, &mut sink, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Aborted);
        assert_eq!(sink.frames[0].as_warning(), Some("w1"));
    }

    #[tokio::test]
    async fn test_cancelled_stream_stops_before_next_series() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut set = set(
            vec![series("api", vec![Scripted::Chunk(0)])],
            &["never sent"],
        );
        let mut sink = RecordingSink::default();
        let status = stream_series(&mut set, 1024, &mut sink, &cancel)
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Cancelled);
        assert!(sink.frames.is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_closed_receiver_aborts() {
        let (mut tx, rx) = mpsc::channel::<std::result::Result<SeriesResponse, Status>>(1);
        drop(rx);
        let mut set = set(vec![series("api", vec![Scripted::Chunk(0)])], &[]);
        let status = stream_series(&mut set, 1024, &mut tx, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Aborted);
    }
}
