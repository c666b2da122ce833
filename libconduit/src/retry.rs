//! Retry combinators for chain reads and transaction submissions.
//!
//! The interval is read from an [`IntervalSource`] before every wait, so a configuration change takes effect on
//! the next retry tick.

use crate::config::IntervalSource;
use log::*;
use std::fmt::Display;
use std::future::Future;

/// Retries `op` indefinitely while it fails with an error matching `on_error`. Any other error is returned
/// immediately. Meant for idempotent reads, with `ChainError::is_network` as the usual predicate.
pub async fn retry_async<T, E, F, Fut, I, P>(op: F, interval: &I, on_error: P, level: Level) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    I: IntervalSource + ?Sized,
    P: Fn(&E) -> bool,
    E: Display,
{
    retry(op, interval, None, on_error, level).await
}

/// Re-invokes `op` after a wait while it fails with an error matching `on_error`, at most `max_retries` times.
/// The last error is returned once the retries are exhausted, and any other error at once.
pub async fn retry_while<T, E, F, Fut, I, P>(
    op: F,
    interval: &I,
    max_retries: usize,
    on_error: P,
    level: Level,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    I: IntervalSource + ?Sized,
    P: Fn(&E) -> bool,
    E: Display,
{
    retry(op, interval, Some(max_retries), on_error, level).await
}

async fn retry<T, E, F, Fut, I, P>(
    mut op: F,
    interval: &I,
    max_retries: Option<usize>,
    on_error: P,
    level: Level,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    I: IntervalSource + ?Sized,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if on_error(&e) && max_retries.map_or(true, |max| attempt < max) => {
                attempt += 1;
                let wait = interval.interval();
                log!(level, "Attempt {attempt} failed, retrying in {}ms. {e}", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}
