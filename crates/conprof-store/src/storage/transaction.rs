//! Scoped write transaction.
//!
//! [`Transaction`] owns an [`Appender`] for the duration of one write. It is
//! either committed (consuming the guard, so a commit can happen only once) or
//! dropped, in which case the appender is rolled back. A commit whose future
//! is dropped before it finishes counts as dropped.

use bytes::Bytes;
use tracing::{debug, warn};

use super::{Appender, Labels, SeriesRef};
use crate::error::{Error, Result};

pub struct Transaction {
    app: Option<Box<dyn Appender>>,
    samples: usize,
}

impl Transaction {
    pub fn new(app: Box<dyn Appender>) -> Self {
        Self {
            app: Some(app),
            samples: 0,
        }
    }

    fn app(&mut self) -> Result<&mut Box<dyn Appender>> {
        self.app
            .as_mut()
            .ok_or_else(|| Error::Internal("transaction already finished".to_string()))
    }

    pub fn add(&mut self, labels: Labels, timestamp: i64, value: Bytes) -> Result<SeriesRef> {
        let series = self.app()?.add(labels, timestamp, value)?;
        self.samples += 1;
        Ok(series)
    }

    /// Number of samples accepted so far.
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub async fn commit(mut self) -> Result<()> {
        debug!(samples = self.samples, "Committing write transaction");
        // The appender stays in the guard until the commit has finished.
        let res = self.app()?.commit().await;
        self.app = None;
        res
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(mut app) = self.app.take() {
            debug!(samples = self.samples, "Abandoning write transaction");
            if let Err(e) = app.rollback() {
                warn!(error = %e, "Failed to roll back abandoned write transaction");
            }
        }
    }
}
