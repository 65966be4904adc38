use std::{
    thread,
    time::{Duration, Instant},
};

use log::debug;

use crate::error::Result;

/// Polls `check` until it yields a value or `timeout` elapses.
///
/// Waits between attempts start at `initial_interval` and grow by half each
/// round, capped at `max_interval`. Errors from `check` propagate
/// immediately; `Ok(None)` signals the deadline passed without a result.
pub fn poll_with_backoff<T>(
    timeout: Duration,
    initial_interval: Duration,
    max_interval: Duration,
    mut check: impl FnMut() -> Result<Option<T>>,
) -> Result<Option<T>> {
    let started = Instant::now();
    let mut interval = initial_interval;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Some(value) = check()? {
            debug!(
                "[retry] condition met after {}ms (attempt {attempt})",
                started.elapsed().as_millis()
            );
            return Ok(Some(value));
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            debug!(
                "[retry] gave up after {}ms (attempt {attempt})",
                elapsed.as_millis()
            );
            return Ok(None);
        }

        let remaining = timeout - elapsed;
        thread::sleep(interval.min(remaining));
        interval = (interval + interval / 2).min(max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn returns_value_on_first_success() {
        let mut calls = 0;
        let result = poll_with_backoff(
            Duration::from_secs(5),
            Duration::from_millis(10),
            Duration::from_millis(50),
            || {
                calls += 1;
                Ok(Some(42))
            },
        );
        assert_eq!(result.unwrap(), Some(42));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let result = poll_with_backoff(
            Duration::from_secs(5),
            Duration::from_millis(5),
            Duration::from_millis(20),
            || {
                calls += 1;
                Ok((calls >= 3).then_some(calls))
            },
        );
        assert_eq!(result.unwrap(), Some(3));
    }

    #[test]
    fn returns_none_on_timeout() {
        let result: Result<Option<()>> = poll_with_backoff(
            Duration::from_millis(50),
            Duration::from_millis(10),
            Duration::from_millis(10),
            || Ok(None),
        );
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn propagates_errors_immediately() {
        let mut calls = 0;
        let result: Result<Option<()>> = poll_with_backoff(
            Duration::from_secs(5),
            Duration::from_millis(10),
            Duration::from_millis(10),
            || {
                calls += 1;
                Err(Error::Storage("boom".into()))
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
