// Retrying delivery: send a batch, and on failure back off linearly, reconnect and resend.

use std::time::Duration;

use graphite::{GraphiteError, Metric, MetricSink};
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total send attempts per batch, including the first. 0 is treated as 1.
    pub retries: u32,
    /// Delay after attempt `n` fails is `n * backoff_unit`.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_backoff_unit(mut self, backoff_unit: Duration) -> Self {
        self.backoff_unit = backoff_unit;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    /// Delay after the given 1-based attempt fails.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}

/// Sends `metrics` through `sink`, retrying per `policy`.
///
/// After a failed attempt that is not the last one, waits, reconnects and
/// tries again. A failed reconnect ends the loop early with the send error
/// that triggered it. Returns the count reported by the successful send.
pub async fn deliver<S>(
    sink: &mut S,
    metrics: &[Metric],
    policy: &RetryPolicy,
) -> Result<usize, GraphiteError>
where
    S: MetricSink + ?Sized,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        let err = match sink.send_metrics(metrics).await {
            Ok(sent) => return Ok(sent),
            Err(err) => err,
        };
        if attempt >= attempts {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt,
            max = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Failed to send metrics, reconnecting"
        );
        tokio::time::sleep(delay).await;

        if let Err(connect_err) = sink.connect().await {
            warn!(error = %connect_err, "Failed to reconnect to Graphite, giving up");
            return Err(err);
        }
        attempt += 1;
    }
}
