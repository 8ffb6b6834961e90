//! Protobuf messages of the `conprof.store` package.
//!
//! Declared with prost derives so the wire format is fixed in Rust; field tags
//! must stay stable across releases. The client and server stubs generated by
//! the build script are included at the bottom of this module.

use bytes::Bytes;
use prost::Message;

/// A single label name/value pair.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Predicate over one label's value.
#[derive(Clone, PartialEq, Message)]
pub struct LabelMatcher {
    #[prost(enumeration = "label_matcher::Type", tag = "1")]
    pub r#type: i32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub value: String,
}

pub mod label_matcher {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        /// =
        Eq = 0,
        /// !=
        Neq = 1,
        /// =~
        Re = 2,
        /// !~
        Nre = 3,
    }
}

impl LabelMatcher {
    pub fn new(
        r#type: label_matcher::Type,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type as i32,
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A timestamped, already serialized profile.
#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(bytes = "bytes", tag = "2")]
    pub value: Bytes,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProfileSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub profile_series: Vec<ProfileSeries>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WriteResponse {}

#[derive(Clone, PartialEq, Message)]
pub struct ProfileRequest {
    #[prost(message, repeated, tag = "1")]
    pub matchers: Vec<LabelMatcher>,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProfileResponse {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: Bytes,
}

#[derive(Clone, PartialEq, Message)]
pub struct SeriesRequest {
    #[prost(int64, tag = "1")]
    pub min_time: i64,
    #[prost(int64, tag = "2")]
    pub max_time: i64,
    #[prost(message, repeated, tag = "3")]
    pub matchers: Vec<LabelMatcher>,
}

/// An engine-encoded block of samples, passed through untouched.
#[derive(Clone, PartialEq, Message)]
pub struct Chunk {
    #[prost(int64, tag = "1")]
    pub min_time: i64,
    #[prost(int64, tag = "2")]
    pub max_time: i64,
    #[prost(enumeration = "chunk::Encoding", tag = "3")]
    pub r#type: i32,
    #[prost(bytes = "bytes", tag = "4")]
    pub data: Bytes,
}

pub mod chunk {
    /// Wire chunk encodings. Each value is the storage engine's encoding
    /// identifier minus one.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Encoding {
        Xor = 0,
        Bytes = 1,
    }
}

/// One streamed frame of a series: its labels and a batch of its chunks.
/// Several frames may carry the same labels when the chunks of one series do
/// not fit a single frame.
#[derive(Clone, PartialEq, Message)]
pub struct RawProfileSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub chunks: Vec<Chunk>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SeriesResponse {
    #[prost(oneof = "series_response::Result", tags = "1, 2")]
    pub result: Option<series_response::Result>,
}

pub mod series_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Series(super::RawProfileSeries),
        #[prost(string, tag = "2")]
        Warning(String),
    }
}

impl SeriesResponse {
    pub fn series(series: RawProfileSeries) -> Self {
        Self {
            result: Some(series_response::Result::Series(series)),
        }
    }

    pub fn warning(warning: impl Into<String>) -> Self {
        Self {
            result: Some(series_response::Result::Warning(warning.into())),
        }
    }

    /// Returns the series frame, if this response carries one.
    pub fn as_series(&self) -> Option<&RawProfileSeries> {
        match &self.result {
            Some(series_response::Result::Series(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns the warning text, if this response carries one.
    pub fn as_warning(&self) -> Option<&str> {
        match &self.result {
            Some(series_response::Result::Warning(w)) => Some(w),
            _ => None,
        }
    }
}

include!(concat!(env!("OUT_DIR"), "/conprof.store.ProfileStore.rs"));
include!(concat!(env!("OUT_DIR"), "/conprof.store.WritableProfileStore.rs"));
