//! Conprof Profile Store Protocol Definitions
//!
//! This crate contains the gRPC service definitions and message types for
//! communication between profile producers, the profile store, and readers.
//!
//! ## Services
//!
//! - **ProfileStore**: API exposed by the store process
//!   - Write: ingest a batch of profile series
//!   - Profile: fetch the single profile at a point in time
//!   - Series: stream the raw encoded chunks of every matching series
//!
//! - **WritableProfileStore**: write-only subset used by producers that
//!   forward profiles to a separate store process
//!
//! ## Usage
//!
//! ### Client-side (producer)
//!
//! ```ignore
//! use conprof_proto::storepb::{
//!     writable_profile_store_client::WritableProfileStoreClient,
//!     Label, ProfileSeries, Sample, WriteRequest,
//! };
//!
//! let mut client = WritableProfileStoreClient::connect("http://localhost:10902").await?;
//!
//! client
//!     .write(WriteRequest {
//!         profile_series: vec![ProfileSeries {
//!             labels: vec![Label::new("job", "api")],
//!             samples: vec![Sample { timestamp: 1_700_000_000_000, value: pprof.into() }],
//!         }],
//!     })
//!     .await?;
//! ```
//!
//! ### Server-side
//!
//! ```ignore
//! use conprof_proto::storepb::{
//!     profile_store_server::{ProfileStore, ProfileStoreServer},
//!     SeriesRequest, SeriesResponse,
//! };
//! ```

/// Messages and services of the `conprof.store` package.
pub mod storepb;
