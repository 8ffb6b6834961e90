//! Conprof Profile Store
//!
//! Storage and retrieval tier of the continuous-profiling backend:
//! - Profile Store gRPC service (write samples, point lookup, streamed chunks)
//! - Storage boundary traits and an in-memory engine implementing them
//! - Forwarding appender writing into a remote store
//! - Wire/engine translation of labels, matchers and chunks

pub mod appendable;
pub mod config;
pub mod error;
pub mod runutil;
pub mod services;
pub mod storage;
pub mod translate;

pub use appendable::{GrpcAppendable, GrpcAppender, RemoteWriter};
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use services::ProfileStoreService;
pub use storage::{Db, MemoryDb};
