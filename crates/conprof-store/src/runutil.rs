//! Run and cleanup helpers.
//!
//! - [`repeat`]: run a task now and then on every tick until it fails or is
//!   cancelled
//! - [`retry`] / [`retry_with_log`]: run a task on every tick until it
//!   succeeds
//! - [`close_with_log_on_err`] / [`CloseOnDrop`]: release a reader and log,
//!   rather than propagate, a failure to do so
//! - [`close_with_err_capture`]: release a reader and fold a close failure
//!   into the caller's result

use std::fmt::Display;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::storage::Close;

impl<C: Close + ?Sized> Close for Box<C> {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Runs `f` immediately and then once per `every` until `f` fails or `cancel`
/// fires. Cancellation is reported as success.
pub async fn repeat<F, Fut, E>(
    every: Duration,
    cancel: &CancellationToken,
    mut f: F,
) -> std::result::Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
{
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    tick.tick().await;

    loop {
        f().await?;
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tick.tick() => {}
        }
    }
}

/// Runs `f` until it succeeds, waiting `every` between attempts. If `cancel`
/// fires first, the last error is returned.
pub async fn retry<F, Fut, T, E>(
    every: Duration,
    cancel: &CancellationToken,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    retry_inner(every, cancel, f, |_| {}).await
}

/// Like [`retry`], logging each failed attempt.
pub async fn retry_with_log<F, Fut, T, E>(
    every: Duration,
    cancel: &CancellationToken,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    retry_inner(every, cancel, f, |e: &E| {
        error!(error = %e, "Function failed, retrying in next tick");
    })
    .await
}

async fn retry_inner<F, Fut, T, E, L>(
    every: Duration,
    cancel: &CancellationToken,
    mut f: F,
    on_err: L,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    L: Fn(&E),
{
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                on_err(&e);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(e),
                    _ = tick.tick() => {}
                }
            }
        }
    }
}

/// Closes `closer`, logging a close failure at `warn` with `context`.
pub fn close_with_log_on_err<C: Close + ?Sized>(closer: &mut C, context: &str) {
    if let Err(e) = closer.close() {
        warn!(error = %e, context = %context, "Detected close error");
    }
}

/// Closes `closer` and records a failure in `res`.
///
/// A successful `res` is replaced by the close error, prefixed with
/// `context`. An error already in `res` wins; the close error is then only
/// logged.
pub fn close_with_err_capture<T, E, C>(
    res: &mut std::result::Result<T, E>,
    closer: &mut C,
    context: &str,
) where
    E: From<Error>,
    C: Close + ?Sized,
{
    let Err(e) = closer.close() else {
        return;
    };
    if res.is_ok() {
        *res = Err(Error::Internal(format!("{}: {}", context, e)).into());
    } else {
        warn!(error = %e, context = %context, "Detected close error");
    }
}

/// Holds a closable reader and closes it when dropped.
pub struct CloseOnDrop<C: Close> {
    inner: C,
    context: &'static str,
}

impl<C: Close> CloseOnDrop<C> {
    pub fn new(inner: C, context: &'static str) -> Self {
        Self { inner, context }
    }
}

impl<C: Close> Deref for CloseOnDrop<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C: Close> DerefMut for CloseOnDrop<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

impl<C: Close> Drop for CloseOnDrop<C> {
    fn drop(&mut self) {
        close_with_log_on_err(&mut self.inner, self.context);
    }
}
