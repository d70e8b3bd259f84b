//! # Retry
//!
//! Fibonacci backoff for HTTP collaborators. Rate limiting (429) and server
//! errors (5xx) are retried; everything else is returned to the caller.
//!
//! Sequence with a 100ms base: 100ms, 100ms, 200ms, 300ms, 500ms, ... capped.

use anyhow::{Context, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Fibonacci backoff in milliseconds
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_ms: u64,
    current_ms: u64,
    max_ms: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            prev_ms: 0,
            current_ms: min_ms,
            max_ms,
        }
    }

    /// Current delay; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_ms;
        let next = self.prev_ms + self.current_ms;
        self.prev_ms = self.current_ms;
        self.current_ms = std::cmp::min(next, self.max_ms);
        Duration::from_millis(result)
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(100, 2_000)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send a request, retrying transient failures up to `max_retries` times.
///
/// The returned response may still carry a non-success status.
pub async fn send_with_retry(request: RequestBuilder, max_retries: u32) -> Result<Response> {
    let mut backoff = FibonacciBackoff::default();
    let mut attempt = 0;
    loop {
        let builder = request
            .try_clone()
            .context("Request body cannot be retried")?;
        let result = builder.send().await;
        let retry = match &result {
            Ok(response) => is_retryable(response.status()),
            Err(e) => e.is_timeout() || e.is_connect(),
        };
        if !retry || attempt >= max_retries {
            return result.context("HTTP request failed");
        }
        attempt += 1;
        let delay = backoff.next_backoff();
        debug!("Retrying request (attempt {attempt}/{max_retries}) in {delay:?}");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(100, 1_000);
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.next_backoff().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 100, 200, 300, 500, 800, 1_000]);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }
}
