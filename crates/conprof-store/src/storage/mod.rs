//! Storage Boundary
//!
//! The profile store never talks to an embedded database directly. It depends
//! on three capabilities, each expressed as a trait:
//!
//! - [`Queryable`]: point/range reads of decoded samples
//! - [`ChunkQueryable`]: range reads of raw, engine-encoded chunks
//! - [`Appendable`]: write transactions
//!
//! Anything that implements all three is a [`Db`].
//!
//! ## Iteration Model
//!
//! Series sets and chunk iterators are plain Rust iterators over `Result`
//! items. An `Err` item is terminal: the iterator yields nothing after it.
//! Warnings (partial-result notices) are collected by the set and read once
//! iteration has finished.
//!
//! ## Resource Release
//!
//! Queriers hold engine resources until [`Close::close`] is called. Callers
//! keep them in a [`CloseOnDrop`](crate::runutil::CloseOnDrop) so release
//! happens on every exit path.

pub mod labels;
pub mod memory;
pub mod transaction;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use labels::{Label, Labels, MatchType, Matcher};
pub use memory::MemoryDb;
pub use transaction::Transaction;

/// Opaque reference to a series inside one write transaction.
pub type SeriesRef = u64;

/// A decoded profile sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub value: Bytes,
}

/// Cursor over the samples of one series, in timestamp order.
pub trait SampleIterator: Send {
    /// Moves to the first sample with `timestamp >= t` and returns it, or
    /// `None` if no such sample exists.
    fn seek(&mut self, t: i64) -> Option<Sample>;
}

pub struct Series {
    pub labels: Labels,
    pub samples: Box<dyn SampleIterator>,
}

pub trait SeriesSet: Iterator<Item = Result<Series>> + Send {
    fn warnings(&self) -> Vec<String>;
}

/// Storage engine chunk encodings. `None` never describes stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Encoding {
    None = 0,
    Xor = 1,
    Bytes = 2,
}

impl Encoding {
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub encoding: Encoding,
    pub data: Bytes,
}

/// A chunk as produced by a chunk iterator. `chunk` is `None` when the engine
/// only resolved the metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub reference: u64,
    pub min_time: i64,
    pub max_time: i64,
    pub chunk: Option<Chunk>,
}

/// Chunks of one series, ordered by time.
pub type ChunkIterator = Box<dyn Iterator<Item = Result<ChunkMeta>> + Send>;

pub struct ChunkSeries {
    pub labels: Labels,
    pub chunks: ChunkIterator,
}

pub trait ChunkSeriesSet: Iterator<Item = Result<ChunkSeries>> + Send {
    fn warnings(&self) -> Vec<String>;
}

/// Releases resources held by a reader.
pub trait Close {
    fn close(&mut self) -> Result<()>;
}

pub trait Querier: Close + Send {
    /// Series matching every matcher, within the querier's time range.
    fn select(&self, matchers: &[Matcher]) -> Box<dyn SeriesSet>;
}

pub trait ChunkQuerier: Close + Send {
    /// Chunk series matching every matcher, within the querier's time range.
    fn select(&self, matchers: &[Matcher]) -> Box<dyn ChunkSeriesSet>;
}

pub trait Queryable: Send + Sync {
    fn querier(&self, min_time: i64, max_time: i64) -> Result<Box<dyn Querier>>;
}

pub trait ChunkQueryable: Send + Sync {
    /// Opens a chunk querier over `[min_time, max_time]`. Once `cancel` fires
    /// the querier stops producing series.
    fn chunk_querier(
        &self,
        cancel: CancellationToken,
        min_time: i64,
        max_time: i64,
    ) -> Result<Box<dyn ChunkQuerier>>;
}

/// A write transaction. Samples added to it become visible only once
/// [`commit`](Appender::commit) succeeds; an appender must be committed or
/// rolled back exactly once and is not reused afterwards.
#[async_trait]
pub trait Appender: Send {
    fn add(&mut self, labels: Labels, timestamp: i64, value: Bytes) -> Result<SeriesRef>;

    /// Adds a sample to a series already referenced in this transaction.
    fn add_fast(&mut self, series: SeriesRef, timestamp: i64, value: Bytes) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

pub trait Appendable: Send + Sync {
    /// Opens a new, independent transaction. `cancel` bounds the lifetime of
    /// any remote work the transaction does.
    fn appender(&self, cancel: CancellationToken) -> Box<dyn Appender>;
}

/// A storage engine offering every capability the profile store needs.
pub trait Db: Queryable + ChunkQueryable + Appendable {}

impl<T: Queryable + ChunkQueryable + Appendable> Db for T {}
