//! Store Error Types
//!
//! This module defines the errors raised by the storage boundary, the label
//! and matcher translation layer, and the forwarding appender.
//!
//! ## Error Categories
//!
//! ### Input Errors (`InvalidArgument`)
//! - `DuplicateLabelName`: a label set names the same label twice
//! - `InvalidMatcher`: a regex matcher does not compile
//! - `UnknownMatcherType`: a wire matcher carries an unknown type code
//! - `OutOfOrderSample`: a sample does not advance its series' timestamps
//!
//! ### Engine Errors (`Internal`)
//! - `ChunkNotPopulated`: a chunk iterator yielded metadata without data
//! - `InvalidChunkEncoding`: a chunk carries no valid encoding
//! - `Internal`: any other engine failure
//!
//! ### Startup Errors
//! - `Config`: an environment variable holds an unusable value
//!
//! ### Transport Errors
//! - `Remote`: a remote call failed; the status is passed through verbatim
//! - `Transport`: a connection to a remote store could not be established
//! - `Cancelled`: the caller abandoned the operation
//!
//! ## Usage
//!
//! All fallible operations return `Result<T>`; handlers turn an `Error` into a
//! `tonic::Status` with `Status::from`.

use thiserror::Error;
use tonic::Status;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate label name: {0}")]
    DuplicateLabelName(String),

    #[error("invalid regex matcher for label {name}: {source}")]
    InvalidMatcher {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown label matcher type {0}")]
    UnknownMatcherType(i32),

    #[error("out of order sample for series {series}: {timestamp} <= {last}")]
    OutOfOrderSample {
        series: String,
        timestamp: i64,
        last: i64,
    },

    #[error("unknown series reference {0}")]
    UnknownSeriesRef(u64),

    #[error("found not populated chunk returned by SeriesSet at ref: {0}")]
    ChunkNotPopulated(u64),

    #[error("invalid chunk encoding {0}")]
    InvalidChunkEncoding(u8),

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("remote call failed: {0}")]
    Remote(#[from] Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Remote(status) => status,
            Error::DuplicateLabelName(_)
            | Error::InvalidMatcher { .. }
            | Error::UnknownMatcherType(_)
            | Error::OutOfOrderSample { .. } => Status::invalid_argument(err.to_string()),
            Error::UnknownSeriesRef(_) => Status::not_found(err.to_string()),
            Error::Unimplemented(_) => Status::unimplemented(err.to_string()),
            Error::Cancelled => Status::cancelled(err.to_string()),
            Error::Transport(_) => Status::unavailable(err.to_string()),
            Error::ChunkNotPopulated(_)
            | Error::InvalidChunkEncoding(_)
            | Error::Config(_)
            | Error::Internal(_) => Status::internal(err.to_string()),
        }
    }
}
