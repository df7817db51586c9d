//! Status polling with bounded transport retry and cancellation
//!
//! Two kinds of "not done" are kept apart:
//! - the probe answered `None`: the condition is not true yet, wait the fixed
//!   polling interval and ask again, with no cap on the number of attempts
//! - the probe failed with a transient transport error: back off
//!   exponentially, and give up after `max_retries` consecutive failures
//!
//! Every wait suspends the task and races the operation's cancellation signal
//! and the caller's deadline.

use crate::config::PollerConfig;
use crate::error::{BridgeError, BridgeResult, ChainResult};
use crate::metrics;

use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Transport retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive transport failures tolerated
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&PollerConfig::default())
    }
}

impl From<&PollerConfig> for RetryConfig {
    fn from(config: &PollerConfig) -> Self {
        Self {
            max_retries: config.max_transport_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Sending half of an operation's cancellation signal
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half, observed by every wait of an operation
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Generic polling primitive used by both orchestrators
#[derive(Debug, Clone)]
pub struct StatusPoller {
    retry: RetryConfig,
    cancel: CancelSignal,
}

impl StatusPoller {
    pub fn new(retry: RetryConfig, cancel: CancelSignal) -> Self {
        Self { retry, cancel }
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Run `fut` unless cancellation or the deadline comes first
    pub async fn bounded<T, Fut>(
        &self,
        what: &str,
        deadline: Option<Instant>,
        fut: Fut,
    ) -> BridgeResult<T>
    where
        Fut: Future<Output = BridgeResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        if deadline.map_or(false, |d| Instant::now() >= d) {
            return Err(BridgeError::timeout(what));
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BridgeError::Cancelled),
            _ = deadline_elapsed(deadline) => Err(BridgeError::timeout(what)),
            result = fut => result,
        }
    }

    /// Evaluate `probe` until it yields a value.
    ///
    /// `Ok(None)` waits `interval`; a transient error backs off; a permanent
    /// error is returned at once. With no deadline the loop only ends on a
    /// value, a permanent error, exhausted retries or cancellation.
    pub async fn poll_until<T, F, Fut>(
        &self,
        what: &str,
        interval: Duration,
        deadline: Option<Instant>,
        mut probe: F,
    ) -> BridgeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ChainResult<Option<T>>>,
    {
        let mut attempts: u64 = 0;
        let mut failures: u32 = 0;

        loop {
            attempts += 1;
            metrics::record_poll(what);

            let outcome = self
                .bounded(what, deadline, probe().map(|r| Ok::<_, BridgeError>(r)))
                .await?;

            let wait = match outcome {
                Ok(Some(value)) => {
                    debug!(what, attempts, "Poll condition met");
                    return Ok(value);
                }
                Ok(None) => {
                    failures = 0;
                    debug!(what, attempts, "Not ready yet");
                    interval
                }
                Err(e) if e.is_transient() => {
                    if failures >= self.retry.max_retries {
                        warn!(what, failures, error = %e, "Transport retries exhausted");
                        return Err(e.into());
                    }
                    let backoff = self.retry.backoff_for_attempt(failures);
                    failures += 1;
                    metrics::record_transport_retry(what);
                    warn!(what, failures, backoff_ms = backoff.as_millis() as u64, error = %e, "Transient poll failure");
                    backoff
                }
                Err(e) => return Err(e.into()),
            };

            self.bounded(what, deadline, async {
                tokio::time::sleep(wait).await;
                Ok(())
            })
            .await?;
        }
    }

    /// One-shot read, retried only on transport failure
    pub async fn read<T, F, Fut>(&self, what: &str, mut probe: F) -> BridgeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        self.poll_until(what, Duration::ZERO, None, || probe().map(|r| r.map(Some)))
            .await
    }
}
