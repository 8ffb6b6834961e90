//! In-memory storage engine.
//!
//! `MemoryDb` keeps every series in a single ordered map guarded by a lock.
//! It implements the full [`Db`](super::Db) capability set and is what the
//! `conprof-store` binary serves from when no external engine is wired in.
//!
//! ## Chunks
//!
//! Samples of a series are cut into consecutive chunks of `samples_per_chunk`
//! samples. Chunk data uses [`Encoding::Bytes`]: for every sample, a big-endian
//! `i64` timestamp, a big-endian `u32` payload length, then the payload.
//!
//! Nothing is persisted; compaction and retention are out of scope.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    Appendable, Appender, Chunk, ChunkMeta, ChunkQuerier, ChunkQueryable, ChunkSeries,
    ChunkSeriesSet, Close, Encoding, Labels, Matcher, Querier, Queryable, Sample, SampleIterator,
    Series, SeriesRef, SeriesSet,
};
use crate::error::{Error, Result};

pub const DEFAULT_SAMPLES_PER_CHUNK: usize = 120;

type Head = BTreeMap<Labels, Vec<Sample>>;

#[derive(Clone)]
pub struct MemoryDb {
    head: Arc<RwLock<Head>>,
    samples_per_chunk: usize,
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLES_PER_CHUNK)
    }
}

impl MemoryDb {
    pub fn new(samples_per_chunk: usize) -> Self {
        Self {
            head: Arc::new(RwLock::new(BTreeMap::new())),
            samples_per_chunk: samples_per_chunk.max(1),
        }
    }

    pub fn series_count(&self) -> Result<usize> {
        Ok(read(&self.head)?.len())
    }

    pub fn sample_count(&self) -> Result<usize> {
        Ok(read(&self.head)?.values().map(Vec::len).sum())
    }
}

fn read(head: &RwLock<Head>) -> Result<RwLockReadGuard<'_, Head>> {
    head.read()
        .map_err(|_| Error::Internal("memory head lock poisoned".to_string()))
}

fn write(head: &RwLock<Head>) -> Result<RwLockWriteGuard<'_, Head>> {
    head.write()
        .map_err(|_| Error::Internal("memory head lock poisoned".to_string()))
}

/// Length prefix of a sample payload. Payloads are limited to `u32::MAX` bytes.
fn payload_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::Internal(format!(
            "sample payload of {} bytes exceeds the {} byte chunk limit",
            len,
            u32::MAX
        ))
    })
}

/// Encodes samples in the `Encoding::Bytes` chunk layout.
pub fn encode_chunk(samples: &[Sample]) -> Result<Bytes> {
    let size = samples.iter().map(|s| 12 + s.value.len()).sum();
    let mut buf = BytesMut::with_capacity(size);
    for s in samples {
        buf.put_i64(s.timestamp);
        buf.put_u32(payload_len(s.value.len())?);
        buf.put_slice(&s.value);
    }
    Ok(buf.freeze())
}

/// Decodes an `Encoding::Bytes` chunk.
pub fn decode_chunk(mut data: Bytes) -> Result<Vec<Sample>> {
    let mut samples = Vec::new();
    while data.has_remaining() {
        if data.remaining() < 12 {
            return Err(Error::Internal("truncated chunk sample header".to_string()));
        }
        let timestamp = data.get_i64();
        let len = data.get_u32() as usize;
        if data.remaining() < len {
            return Err(Error::Internal("truncated chunk sample payload".to_string()));
        }
        let value = data.split_to(len);
        samples.push(Sample { timestamp, value });
    }
    Ok(samples)
}

impl Queryable for MemoryDb {
    fn querier(&self, min_time: i64, max_time: i64) -> Result<Box<dyn Querier>> {
        Ok(Box::new(MemoryQuerier {
            head: self.head.clone(),
            min_time,
            max_time,
            closed: false,
        }))
    }
}

impl ChunkQueryable for MemoryDb {
    fn chunk_querier(
        &self,
        cancel: CancellationToken,
        min_time: i64,
        max_time: i64,
    ) -> Result<Box<dyn ChunkQuerier>> {
        Ok(Box::new(MemoryChunkQuerier {
            head: self.head.clone(),
            cancel,
            min_time,
            max_time,
            samples_per_chunk: self.samples_per_chunk,
            closed: false,
        }))
    }
}

impl Appendable for MemoryDb {
    fn appender(&self, _cancel: CancellationToken) -> Box<dyn Appender> {
        Box::new(MemoryAppender {
            head: self.head.clone(),
            refs: Vec::new(),
            pending: Vec::new(),
        })
    }
}

// ============================================================================
// Sample queries
// ============================================================================

struct MemoryQuerier {
    head: Arc<RwLock<Head>>,
    min_time: i64,
    max_time: i64,
    closed: bool,
}

impl Close for MemoryQuerier {
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl Querier for MemoryQuerier {
    fn select(&self, matchers: &[Matcher]) -> Box<dyn SeriesSet> {
        if self.closed {
            return Box::new(MemorySet::<Series>::failed(Error::Internal(
                "querier already closed".to_string(),
            )));
        }
        let head = match read(&self.head) {
            Ok(head) => head,
            Err(e) => return Box::new(MemorySet::<Series>::failed(e)),
        };

        let mut selected = Vec::new();
        for (labels, samples) in head.iter().filter(|(l, _)| l.matches(matchers)) {
            let in_range: Vec<Sample> = samples
                .iter()
                .filter(|s| s.timestamp >= self.min_time && s.timestamp <= self.max_time)
                .cloned()
                .collect();
            if in_range.is_empty() {
                continue;
            }
            selected.push(Ok(Series {
                labels: labels.clone(),
                samples: Box::new(VecSampleIterator {
                    samples: in_range,
                    pos: 0,
                }),
            }));
        }
        Box::new(MemorySet::new(selected))
    }
}

struct VecSampleIterator {
    samples: Vec<Sample>,
    pos: usize,
}

impl SampleIterator for VecSampleIterator {
    fn seek(&mut self, t: i64) -> Option<Sample> {
        while self.pos < self.samples.len() && self.samples[self.pos].timestamp < t {
            self.pos += 1;
        }
        self.samples.get(self.pos).cloned()
    }
}

/// Pre-materialised result set. Never produces warnings.
struct MemorySet<T> {
    items: std::vec::IntoIter<Result<T>>,
}

impl<T> MemorySet<T> {
    fn new(items: Vec<Result<T>>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    fn failed(err: Error) -> Self {
        Self::new(vec![Err(err)])
    }
}

impl<T> Iterator for MemorySet<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

impl SeriesSet for MemorySet<Series> {
    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }
}

impl ChunkSeriesSet for MemorySet<ChunkSeries> {
    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// Chunk queries
// ============================================================================

struct MemoryChunkQuerier {
    head: Arc<RwLock<Head>>,
    cancel: CancellationToken,
    min_time: i64,
    max_time: i64,
    samples_per_chunk: usize,
    closed: bool,
}

impl Close for MemoryChunkQuerier {
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl ChunkQuerier for MemoryChunkQuerier {
    fn select(&self, matchers: &[Matcher]) -> Box<dyn ChunkSeriesSet> {
        if self.closed {
            return Box::new(MemorySet::<ChunkSeries>::failed(Error::Internal(
                "chunk querier already closed".to_string(),
            )));
        }
        if self.cancel.is_cancelled() {
            return Box::new(MemorySet::<ChunkSeries>::failed(Error::Cancelled));
        }
        let head = match read(&self.head) {
            Ok(head) => head,
            Err(e) => return Box::new(MemorySet::<ChunkSeries>::failed(e)),
        };

        let mut selected = Vec::new();
        for (series_idx, (labels, samples)) in head.iter().enumerate() {
            if !labels.matches(matchers) {
                continue;
            }
            let chunks: Vec<Result<ChunkMeta>> = samples
                .chunks(self.samples_per_chunk)
                .enumerate()
                .filter_map(|(chunk_idx, group)| {
                    let min_time = group.first()?.timestamp;
                    let max_time = group.last()?.timestamp;
                    if max_time < self.min_time || min_time > self.max_time {
                        return None;
                    }
                    let data = match encode_chunk(group) {
                        Ok(data) => data,
                        Err(e) => return Some(Err(e)),
                    };
                    Some(Ok(ChunkMeta {
                        reference: ((series_idx as u64) << 32) | chunk_idx as u64,
                        min_time,
                        max_time,
                        chunk: Some(Chunk {
                            encoding: Encoding::Bytes,
                            data,
                        }),
                    }))
                })
                .collect();
            if chunks.is_empty() {
                continue;
            }
            selected.push(Ok(ChunkSeries {
                labels: labels.clone(),
                chunks: Box::new(chunks.into_iter()),
            }));
        }
        Box::new(MemorySet::new(selected))
    }
}

// ============================================================================
// Writes
// ============================================================================

struct MemoryAppender {
    head: Arc<RwLock<Head>>,
    /// Series referenced in this transaction, indexed by `SeriesRef`.
    refs: Vec<Labels>,
    pending: Vec<(usize, Sample)>,
}

#[async_trait]
impl Appender for MemoryAppender {
    fn add(&mut self, labels: Labels, timestamp: i64, value: Bytes) -> Result<SeriesRef> {
        payload_len(value.len())?;
        let idx = match self.refs.iter().position(|l| *l == labels) {
            Some(idx) => idx,
            None => {
                self.refs.push(labels);
                self.refs.len() - 1
            }
        };
        self.pending.push((idx, Sample { timestamp, value }));
        Ok(idx as SeriesRef)
    }

    fn add_fast(&mut self, series: SeriesRef, timestamp: i64, value: Bytes) -> Result<()> {
        payload_len(value.len())?;
        let idx = usize::try_from(series)
            .ok()
            .filter(|idx| *idx < self.refs.len())
            .ok_or(Error::UnknownSeriesRef(series))?;
        self.pending.push((idx, Sample { timestamp, value }));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut head = write(&self.head)?;

        // Validate the whole batch before touching the head.
        let mut last: HashMap<usize, i64> = HashMap::new();
        for (idx, sample) in &pending {
            let prev = match last.get(idx) {
                Some(t) => Some(*t),
                None => head
                    .get(&self.refs[*idx])
                    .and_then(|s| s.last())
                    .map(|s| s.timestamp),
            };
            if let Some(prev) = prev {
                if sample.timestamp <= prev {
                    return Err(Error::OutOfOrderSample {
                        series: self.refs[*idx].to_string(),
                        timestamp: sample.timestamp,
                        last: prev,
                    });
                }
            }
            last.insert(*idx, sample.timestamp);
        }

        let samples = pending.len();
        for (idx, sample) in pending {
            head.entry(self.refs[idx].clone()).or_default().push(sample);
        }
        debug!(samples, series = self.refs.len(), "Committed samples to memory head");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}
