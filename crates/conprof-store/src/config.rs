//! Store server configuration.
//!
//! All settings come from environment variables:
//!
//! - `CONPROF_STORE_ADDR`: gRPC bind address (default: `0.0.0.0:10902`)
//! - `CONPROF_MAX_BYTES_PER_FRAME`: byte budget of one `Series` response
//!   frame (default: 1 MiB)
//! - `CONPROF_SAMPLES_PER_CHUNK`: samples the in-memory engine packs into one
//!   chunk (default: 120)

use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::memory::DEFAULT_SAMPLES_PER_CHUNK;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:10902";

/// 1 MiB, comfortably under the default 4 MiB gRPC message limit.
pub const DEFAULT_MAX_BYTES_PER_FRAME: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub listen_addr: SocketAddr,
    pub max_bytes_per_frame: usize,
    pub samples_per_chunk: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 10902)),
            max_bytes_per_frame: DEFAULT_MAX_BYTES_PER_FRAME,
            samples_per_chunk: DEFAULT_SAMPLES_PER_CHUNK,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            listen_addr: parse_var(&lookup, "CONPROF_STORE_ADDR", defaults.listen_addr)?,
            max_bytes_per_frame: parse_var(
                &lookup,
                "CONPROF_MAX_BYTES_PER_FRAME",
                defaults.max_bytes_per_frame,
            )?,
            samples_per_chunk: parse_var(
                &lookup,
                "CONPROF_SAMPLES_PER_CHUNK",
                defaults.samples_per_chunk,
            )?,
        };

        if config.max_bytes_per_frame == 0 {
            return Err(Error::Config(
                "CONPROF_MAX_BYTES_PER_FRAME must be positive".to_string(),
            ));
        }
        if config.samples_per_chunk == 0 {
            return Err(Error::Config(
                "CONPROF_SAMPLES_PER_CHUNK must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.max_bytes_per_frame, 1024 * 1024);
        assert_eq!(config.samples_per_chunk, 120);
    }

    #[test]
    fn test_overrides() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("CONPROF_STORE_ADDR", "127.0.0.1:9000"),
            ("CONPROF_MAX_BYTES_PER_FRAME", "4096"),
            ("CONPROF_SAMPLES_PER_CHUNK", " 8 "),
        ]))
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.max_bytes_per_frame, 4096);
        assert_eq!(config.samples_per_chunk, 8);
    }

    #[test]
    fn test_bad_values_rejected() {
        let err = StoreConfig::from_lookup(lookup(&[("CONPROF_STORE_ADDR", "nowhere")]))
            .unwrap_err();
        assert!(err.to_string().contains("CONPROF_STORE_ADDR"));

        let err = StoreConfig::from_lookup(lookup(&[("CONPROF_MAX_BYTES_PER_FRAME", "0")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
